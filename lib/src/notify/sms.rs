/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use std::sync::Arc;

use futures::future::BoxFuture;
use serde_json::json;

use super::{check_status, receiver_config, render_message, Notifier, NotifierEnv};
use crate::{
    alert::Alert,
    config::ConfigSpec,
    context::ExecContext,
    error::{Error, Result},
    labels::Labels,
    receiver::{Receiver, ReceiverSpec},
};

/// Posts one message for all phone numbers to an SMS gateway.
pub struct SmsNotifier {
    env: Arc<NotifierEnv>,
    url: String,
    api_key: Option<String>,
    sign_name: Option<String>,
    phone_numbers: Vec<String>,
}

impl SmsNotifier {
    pub fn new(receiver: &Receiver, env: Arc<NotifierEnv>) -> Result<Self> {
        let ReceiverSpec::Sms(spec) = &receiver.spec else {
            return Err(Error::InvalidReceiver(
                receiver.key(),
                String::from("not an sms receiver"),
            ));
        };
        let config = receiver_config(receiver, |c| match c {
            ConfigSpec::Sms(c) => Some(c),
            _ => None,
        })?;
        Ok(Self {
            env,
            url: config.url.clone(),
            api_key: config.api_key.as_ref().map(|k| k.resolve()).transpose()?,
            sign_name: config.sign_name.clone(),
            phone_numbers: spec.phone_numbers.clone(),
        })
    }
}

impl Notifier for SmsNotifier {
    fn notify<'a>(
        &'a self,
        _ctx: &'a ExecContext,
        group: &'a Labels,
        alerts: &'a [Alert],
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let body = json!({
                "phoneNumbers": self.phone_numbers,
                "signName": self.sign_name,
                "message": render_message(group, alerts),
            });
            let response = self
                .env
                .post_json(&self.url, self.api_key.as_deref(), &body)
                .await?;
            check_status(&self.url, &response)
        })
    }
}
