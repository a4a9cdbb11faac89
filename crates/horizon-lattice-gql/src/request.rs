//! GraphQL request types and payload formatting.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};

/// A GraphQL operation type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    /// A query operation (read-only).
    #[default]
    Query,
    /// A mutation operation (modifies data).
    Mutation,
    /// A subscription operation (real-time updates).
    Subscription,
}

impl OperationType {
    /// Infer the operation type from the leading keyword of a document.
    ///
    /// Anonymous `{ ... }` documents are queries.
    pub fn infer(document: &str) -> Self {
        let trimmed = document.trim_start();
        if starts_with_keyword(trimmed, "subscription") {
            Self::Subscription
        } else if starts_with_keyword(trimmed, "mutation") {
            Self::Mutation
        } else {
            Self::Query
        }
    }
}

fn starts_with_keyword(document: &str, keyword: &str) -> bool {
    document
        .strip_prefix(keyword)
        .and_then(|rest| rest.chars().next())
        .is_some_and(char::is_whitespace)
}

/// The JSON body of a `start` frame.
#[derive(Serialize)]
struct StartPayload<'a> {
    query: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    variables: Option<&'a Value>,
}

/// Format a document and its variables as a `start` payload.
///
/// `variables` is omitted entirely when it is absent, `null` or an empty
/// object, since servers with strict argument checking reject `{}` for
/// operations that declare no variables. Anything other than an object is
/// rejected as misuse.
pub fn format_payload(document: &str, variables: Option<&Value>) -> Result<String> {
    let variables = match variables {
        None | Some(Value::Null) => None,
        Some(Value::Object(map)) if map.is_empty() => None,
        Some(value @ Value::Object(_)) => Some(value),
        Some(other) => return Err(invalid_variables(other)),
    };
    Ok(serde_json::to_string(&StartPayload {
        query: document,
        variables,
    })?)
}

/// Convert serializable variables to JSON, rejecting non-object values.
pub(crate) fn variables_to_value(variables: impl Serialize) -> Result<Option<Value>> {
    let value =
        serde_json::to_value(variables).map_err(|e| Error::InvalidVariables(e.to_string()))?;
    match value {
        Value::Null => Ok(None),
        Value::Object(map) if map.is_empty() => Ok(None),
        value @ Value::Object(_) => Ok(Some(value)),
        other => Err(invalid_variables(&other)),
    }
}

fn invalid_variables(value: &Value) -> Error {
    let kind = match value {
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Null | Value::Object(_) => "a non-object value",
    };
    Error::InvalidVariables(format!(
        "variables must be a JSON object, got {kind}; verify the order of your parameters"
    ))
}

/// A GraphQL request.
///
/// Represents a GraphQL operation with optional variables and operation name.
/// The operation name labels the operation in log events.
#[derive(Debug, Clone)]
pub struct GraphQLRequest {
    /// The GraphQL query string.
    pub query: String,

    /// Optional variables for the query.
    pub variables: Option<Value>,

    /// Optional operation name.
    pub operation_name: Option<String>,

    pub(crate) operation_type: OperationType,

    /// First variables error, reported when the request is submitted.
    invalid_variables: Option<String>,
}

impl GraphQLRequest {
    /// Create a new query request.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let request = GraphQLRequest::query(r#"
    ///     query GetUsers {
    ///         users {
    ///             id
    ///             name
    ///         }
    ///     }
    /// "#);
    /// ```
    pub fn query(query: impl Into<String>) -> Self {
        Self::with_type(query.into(), OperationType::Query)
    }

    /// Create a new mutation request.
    pub fn mutation(query: impl Into<String>) -> Self {
        Self::with_type(query.into(), OperationType::Mutation)
    }

    /// Create a new subscription request.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let request = GraphQLRequest::subscription(r#"
    ///     subscription OnUserCreated {
    ///         users(order_by: {created_at: desc}, limit: 1) {
    ///             id
    ///             name
    ///         }
    ///     }
    /// "#);
    /// ```
    pub fn subscription(query: impl Into<String>) -> Self {
        Self::with_type(query.into(), OperationType::Subscription)
    }

    /// Create a new request from a raw document, inferring its type.
    pub fn new(query: impl Into<String>) -> Self {
        let query = query.into();
        let operation_type = OperationType::infer(&query);
        Self::with_type(query, operation_type)
    }

    fn with_type(query: String, operation_type: OperationType) -> Self {
        Self {
            query,
            variables: None,
            operation_name: None,
            operation_type,
            invalid_variables: None,
        }
    }

    /// Set a variable value.
    ///
    /// # Example
    ///
    /// ```ignore
    /// let request = GraphQLRequest::query("...")
    ///     .variable("id", "123")
    ///     .variable("limit", 10);
    /// ```
    pub fn variable(mut self, name: impl Into<String>, value: impl Serialize) -> Self {
        match serde_json::to_value(value) {
            Ok(value) => {
                let variables = self
                    .variables
                    .get_or_insert_with(|| Value::Object(Default::default()));
                if let Value::Object(map) = variables {
                    map.insert(name.into(), value);
                }
            }
            Err(e) => {
                self.invalid_variables.get_or_insert(e.to_string());
            }
        }
        self
    }

    /// Set all variables from a serializable value.
    ///
    /// The value must serialize to a JSON object (or `null` for none);
    /// anything else fails the request when it is submitted.
    pub fn variables(mut self, variables: impl Serialize) -> Self {
        match variables_to_value(variables) {
            Ok(value) => self.variables = value,
            Err(Error::InvalidVariables(message)) => {
                self.invalid_variables.get_or_insert(message);
            }
            Err(other) => {
                self.invalid_variables.get_or_insert(other.to_string());
            }
        }
        self
    }

    /// Set the operation name.
    pub fn operation_name(mut self, name: impl Into<String>) -> Self {
        self.operation_name = Some(name.into());
        self
    }

    /// Get the operation type.
    pub fn operation_type(&self) -> OperationType {
        self.operation_type
    }

    /// Check if this is a subscription.
    pub fn is_subscription(&self) -> bool {
        self.operation_type == OperationType::Subscription
    }

    /// Format the `start` payload, reporting any variables misuse.
    pub fn to_payload(&self) -> Result<String> {
        if let Some(message) = &self.invalid_variables {
            return Err(Error::InvalidVariables(message.clone()));
        }
        format_payload(&self.query, self.variables.as_ref())
    }
}
