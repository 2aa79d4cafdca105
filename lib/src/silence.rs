/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::{alert::Alert, labels::LabelSelector, tenant::TenantId};

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
#[serde(rename_all = "camelCase")]
pub struct SilenceSpec {
    #[serde(default = "enabled")]
    pub enabled: bool,
    pub matcher: LabelSelector,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub starts_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none", with = "humantime_serde")]
    pub duration: Option<Duration>,
}

fn enabled() -> bool {
    true
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Clone, Debug)]
pub struct Silence {
    pub name: String,
    pub tenant: TenantId,
    pub spec: SilenceSpec,
}

impl Silence {
    /// A silence is active when enabled and `now` falls inside
    /// `[startsAt, startsAt + duration)`. Missing bounds are open.
    pub fn is_active(&self, now: DateTime<Utc>) -> bool {
        if !self.spec.enabled {
            return false;
        }
        let Some(start) = self.spec.starts_at else {
            return true;
        };
        if now < start {
            return false;
        }
        match self.spec.duration.and_then(|d| chrono::Duration::from_std(d).ok()) {
            Some(duration) => start
                .checked_add_signed(duration)
                .map_or(true, |end| now < end),
            None => true,
        }
    }

    pub fn is_global(&self) -> bool {
        self.tenant.is_global()
    }

    pub fn matches(&self, alert: &Alert) -> bool {
        self.spec.matcher.matches(&alert.labels)
    }
}
