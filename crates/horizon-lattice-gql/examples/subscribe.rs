//! Query and subscribe against a GraphQL endpoint.
//!
//! Run with: cargo run -p horizon-lattice-gql --example subscribe
//!
//! Reads `GRAPHQL_URL` (default `ws://localhost:8080/v1/graphql`), and
//! `HASURA_ADMIN_SECRET` or `GRAPHQL_TOKEN` for authentication.

use std::time::Duration;

use horizon_lattice_gql::{Credentials, GraphQLRequest, GraphQLSocketClient};

#[tokio::main]
async fn main() -> horizon_lattice_gql::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter("info,horizon_lattice_gql=debug")
        .init();

    let url = std::env::var("GRAPHQL_URL")
        .unwrap_or_else(|_| "ws://localhost:8080/v1/graphql".to_string());
    let credentials = Credentials {
        admin_secret: std::env::var("HASURA_ADMIN_SECRET").ok(),
        token: std::env::var("GRAPHQL_TOKEN").ok(),
        ..Credentials::default()
    };

    let client = GraphQLSocketClient::builder(url)
        .request_timeout(Duration::from_secs(10))
        .build()?;
    let ack = client.connect(&credentials).await?;
    tracing::info!(%ack, "connected");

    let typename = client
        .execute(GraphQLRequest::query("query { __typename }"))
        .await?;
    tracing::info!(?typename, "query result");

    let mut events = client.subscribe_stream(GraphQLRequest::subscription(
        "subscription { __typename }",
    ))?;
    let listen = async {
        while let Some(data) = events.next().await {
            tracing::info!(%data, "subscription data");
        }
    };
    if tokio::time::timeout(Duration::from_secs(30), listen).await.is_err() {
        tracing::info!("stopping subscription");
    }
    events.stop();
    if let Some(outcome) = events.outcome() {
        tracing::info!(?outcome, "subscription settled");
    }

    Ok(())
}
