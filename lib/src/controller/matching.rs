/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::collections::BTreeMap;

use crate::{
    config::Config,
    labels::{selector_matches, LabelSelector},
    receiver::Receiver,
    tenant::TenantId,
};

pub(crate) type ConfigIndex = BTreeMap<TenantId, BTreeMap<String, Config>>;

/// Find the config a receiver should use.
///
/// Global receivers only look at default configs, constrained by their
/// config selector. Tenant receivers look at their tenant's configs
/// first and fall back to any default config of their type. Among the
/// candidates the lowest priority wins; ties go to the first key in
/// order.
pub(crate) fn matched_config<'a>(
    receiver: &Receiver,
    configs: &'a ConfigIndex,
) -> Option<&'a Config> {
    let defaults = configs.get(&TenantId::default_config());
    let selector = receiver.config_selector.as_ref();

    if receiver.tenant.is_global() {
        return best_candidate(receiver, defaults, selector);
    }

    best_candidate(receiver, configs.get(&receiver.tenant), selector)
        .or_else(|| best_candidate(receiver, defaults, None))
}

fn best_candidate<'a>(
    receiver: &Receiver,
    configs: Option<&'a BTreeMap<String, Config>>,
    selector: Option<&LabelSelector>,
) -> Option<&'a Config> {
    let prefix = format!("{}/", receiver.kind());
    configs?
        .range(prefix.clone()..)
        .take_while(|(key, _)| key.starts_with(&prefix))
        .map(|(_, config)| config)
        .filter(|config| selector_matches(selector, &config.labels))
        .filter(|config| match config.validate() {
            Ok(()) => true,
            Err(e) => {
                log::debug!("skipping config {}: {e}", config.key());
                false
            }
        })
        .min_by_key(|config| config.priority_rank())
}

#[cfg(test)]
mod test {
    use std::collections::BTreeMap;

    use serde_json::json;

    use super::{matched_config, ConfigIndex};
    use crate::{
        config::{Config, ConfigSpec, PRIORITY_LABEL},
        labels::{LabelSelector, Labels},
        receiver::{Receiver, ReceiverSpec},
        tenant::TenantId,
    };

    fn config(name: &str, tenant: TenantId, labels: &[(&str, &str)]) -> Config {
        let spec: ConfigSpec =
            serde_json::from_value(json!({"slack": {"token": format!("token-{name}")}})).unwrap();
        let labels = labels
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::new(name.into(), tenant, labels, spec)
    }

    fn receiver(tenant: TenantId, selector: Option<LabelSelector>) -> Receiver {
        let spec: ReceiverSpec =
            serde_json::from_value(json!({"slack": {"channels": ["#alerts"]}})).unwrap();
        let mut receiver = Receiver::new("team".into(), tenant, Labels::new(), spec);
        receiver.config_selector = selector;
        receiver
    }

    fn index(configs: Vec<Config>) -> ConfigIndex {
        let mut index: ConfigIndex = BTreeMap::new();
        for config in configs {
            index
                .entry(config.tenant.clone())
                .or_default()
                .insert(config.key(), config);
        }
        index
    }

    #[test]
    fn lowest_priority_wins() {
        let selector = LabelSelector::from_labels([("team", "ops")]);
        let configs = index(vec![
            config("a", TenantId::default_config(), &[("team", "ops"), (PRIORITY_LABEL, "10")]),
            config("b", TenantId::default_config(), &[("team", "ops"), (PRIORITY_LABEL, "1")]),
            config("c", TenantId::default_config(), &[("team", "ops"), (PRIORITY_LABEL, "5")]),
            config("d", TenantId::default_config(), &[("team", "ops")]),
        ]);

        let receiver = receiver(TenantId::global(), Some(selector));
        for _ in 0..5 {
            assert_eq!(matched_config(&receiver, &configs).unwrap().name, "b");
        }
    }

    #[test]
    fn global_receiver_uses_selector_on_defaults() {
        let configs = index(vec![config("a", TenantId::default_config(), &[("team", "db")])]);
        let selected = receiver(
            TenantId::global(),
            Some(LabelSelector::from_labels([("team", "ops")])),
        );
        assert!(matched_config(&selected, &configs).is_none());
        let any = receiver(TenantId::global(), None);
        assert_eq!(matched_config(&any, &configs).unwrap().name, "a");
    }

    #[test]
    fn tenant_falls_back_to_default() {
        let alice = TenantId::new("alice".into());
        let selector = LabelSelector::from_labels([("team", "ops")]);

        let configs = index(vec![
            config("own", alice.clone(), &[("team", "db")]),
            config("shared", TenantId::default_config(), &[("team", "db")]),
        ]);
        let receiver = receiver(alice.clone(), Some(selector));
        assert_eq!(matched_config(&receiver, &configs).unwrap().name, "shared");

        let configs = index(vec![config("own", alice.clone(), &[("team", "ops")])]);
        assert_eq!(matched_config(&receiver, &configs).unwrap().name, "own");

        let configs = index(vec![config("own", alice, &[("team", "db")])]);
        assert!(matched_config(&receiver, &configs).is_none());
    }

    #[test]
    fn other_types_and_invalid_configs_are_ignored() {
        let email: ConfigSpec = serde_json::from_value(json!({"email": {
            "smartHost": {"host": "smtp", "port": 25},
            "from": "nm@example.com"
        }}))
        .unwrap();
        let invalid: ConfigSpec =
            serde_json::from_value(json!({"slack": {"token": ""}})).unwrap();
        let configs = index(vec![
            Config::new("mail".into(), TenantId::default_config(), Labels::new(), email),
            Config::new("empty".into(), TenantId::default_config(), Labels::new(), invalid),
        ]);
        assert!(matched_config(&receiver(TenantId::global(), None), &configs).is_none());
    }
}
