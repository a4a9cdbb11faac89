//! Prepared operations.
//!
//! A [`PreparedOperation`] formats its document once; each run only splices
//! the variables in.
//!
//! ```ignore
//! let get_user = PreparedOperation::new("query($id: Int!) { user(id: $id) { name } }");
//!
//! // First field of `data`: the `user` object.
//! let user = get_user.run(&client, json!({ "id": 42 })).await?;
//! ```

use serde::Serialize;
use serde_json::Value;

use crate::client::{GraphQLSocketClient, SubscriptionHandle};
use crate::error::{Error, Result};
use crate::request::{OperationType, variables_to_value};

/// Which part of `data` a prepared operation yields.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Default)]
pub enum Extract {
    /// The first field of `data`.
    #[default]
    First,
    /// The whole `data` object.
    All,
    /// The first element of the first field of `data`.
    One,
}

impl Extract {
    /// Apply the extraction; missing parts yield `null`.
    pub fn apply(self, data: Value) -> Value {
        match self {
            Self::All => data,
            Self::First => first_field(data),
            Self::One => match first_field(data) {
                Value::Array(items) => items.into_iter().next().unwrap_or_default(),
                _ => Value::Null,
            },
        }
    }
}

fn first_field(data: Value) -> Value {
    match data {
        Value::Object(map) => map.into_iter().next().map(|(_, v)| v).unwrap_or_default(),
        _ => Value::Null,
    }
}

/// A document with its `start` payload pre-formatted.
#[derive(Clone, Debug)]
pub struct PreparedOperation {
    query: String,
    name: Option<String>,
    operation_type: OperationType,
    /// Payload without variables.
    no_variables: String,
}

impl PreparedOperation {
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let no_variables = format!("{{\"query\":{}}}", Value::String(query.clone()));
        Self {
            operation_type: OperationType::infer(&query),
            query,
            name: None,
            no_variables,
        }
    }

    /// Label the operation in log events.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// The document.
    pub fn query(&self) -> &str {
        &self.query
    }

    /// Whether the document is a subscription.
    pub fn is_subscription(&self) -> bool {
        self.operation_type == OperationType::Subscription
    }

    /// Format the `start` payload for `variables`.
    ///
    /// `variables` is omitted for `None`, `null` and `{}`. Values that do not
    /// serialize to a JSON object are rejected.
    pub fn payload(&self, variables: impl Serialize) -> Result<String> {
        match variables_to_value(variables)? {
            None => Ok(self.no_variables.clone()),
            Some(variables) => {
                let base = &self.no_variables[..self.no_variables.len() - 1];
                Ok(format!("{base},\"variables\":{variables}}}"))
            }
        }
    }

    /// Run and yield the first field of `data`.
    pub async fn run(
        &self,
        client: &GraphQLSocketClient,
        variables: impl Serialize,
    ) -> Result<Value> {
        self.run_with(client, variables, |data| Extract::First.apply(data)).await
    }

    /// Run and yield the whole `data` object.
    pub async fn run_all(
        &self,
        client: &GraphQLSocketClient,
        variables: impl Serialize,
    ) -> Result<Value> {
        self.run_with(client, variables, |data| Extract::All.apply(data)).await
    }

    /// Run and yield the first element of the first field of `data`.
    pub async fn run_one(
        &self,
        client: &GraphQLSocketClient,
        variables: impl Serialize,
    ) -> Result<Value> {
        self.run_with(client, variables, |data| Extract::One.apply(data)).await
    }

    /// Run and map `data` (`null` when none was sent).
    pub async fn run_with<T>(
        &self,
        client: &GraphQLSocketClient,
        variables: impl Serialize,
        mapper: impl FnOnce(Value) -> T,
    ) -> Result<T> {
        if self.is_subscription() {
            return Err(Error::OperationType(
                "use subscribe() for subscription documents".into(),
            ));
        }
        let payload = self.payload(variables)?;
        let data = client.execute_raw(payload, self.name.as_deref()).await?;
        Ok(mapper(data.unwrap_or_default()))
    }

    /// Open the subscription, passing each payload through `extract`.
    pub fn subscribe<F>(
        &self,
        client: &GraphQLSocketClient,
        variables: impl Serialize,
        extract: Extract,
        callback: F,
    ) -> Result<SubscriptionHandle>
    where
        F: Fn(Value) + Send + Sync + 'static,
    {
        if !self.is_subscription() {
            return Err(Error::OperationType(
                "use run() for query and mutation documents".into(),
            ));
        }
        let payload = self.payload(variables)?;
        client.subscribe_raw(
            move |data| callback(extract.apply(data)),
            payload,
            self.name.as_deref(),
        )
    }
}
