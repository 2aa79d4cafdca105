/******************************************************************************
 * Copyright ContinuousC. Licensed under the "Elastic License 2.0".           *
 ******************************************************************************/

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// A secret value, given inline or read from the environment.
#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
#[serde(untagged)]
pub enum Credential {
    Plain(String),
    Value {
        value: String,
    },
    ValueFrom {
        #[serde(rename = "valueFrom")]
        value_from: ValueSource,
    },
}

#[derive(Serialize, Deserialize, PartialEq, Eq, Hash, Clone, Debug)]
pub struct ValueSource {
    pub env: String,
}

impl Credential {
    pub fn resolve(&self) -> Result<String> {
        let value = match self {
            Credential::Plain(value) | Credential::Value { value } => value.clone(),
            Credential::ValueFrom { value_from } => std::env::var(&value_from.env)
                .map_err(|_| Error::MissingCredential(value_from.env.clone()))?,
        };
        match value.is_empty() {
            true => Err(Error::EmptyCredential),
            false => Ok(value),
        }
    }

    /// Structural check, without touching the environment.
    pub fn is_set(&self) -> bool {
        match self {
            Credential::Plain(value) | Credential::Value { value } => !value.is_empty(),
            Credential::ValueFrom { value_from } => !value_from.env.is_empty(),
        }
    }
}
