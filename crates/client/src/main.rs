//! `storedesk-probe`: fetch and explain the effective permissions of one
//! subject, printed as JSON.
//!
//! Reads `ClientConfig` from the environment plus `STOREDESK_TENANT_ID`,
//! `STOREDESK_USER_ID`, optional `STOREDESK_STORE_ID` and
//! `STOREDESK_ROLE` (default `viewer`).

use anyhow::{Context, Result};
use serde_json::json;
use storedesk_auth::{explain, Role, Subject};
use storedesk_client::{ApiClient, ClientConfig, Session};
use storedesk_core::{StoreId, TenantId, UserId};

fn required(var: &str) -> Result<String> {
    std::env::var(var).with_context(|| format!("{var} must be set"))
}

fn subject_from_env() -> Result<Subject> {
    let tenant_id: TenantId = required("STOREDESK_TENANT_ID")?.parse()?;
    let user_id: UserId = required("STOREDESK_USER_ID")?.parse()?;
    let role = std::env::var("STOREDESK_ROLE").unwrap_or_else(|_| "viewer".to_string());

    let mut subject = Subject::new(user_id, tenant_id, Role::new(role));
    if let Ok(store) = std::env::var("STOREDESK_STORE_ID") {
        let store_id: StoreId = store.parse()?;
        subject = subject.with_store(store_id);
    }
    Ok(subject)
}

#[tokio::main]
async fn main() -> Result<()> {
    storedesk_observability::init();

    let config = ClientConfig::from_env().context("loading client configuration")?;
    let subject = subject_from_env()?;
    let session = Session::new(subject.clone(), config.cache_ttl());
    let client = ApiClient::new(config, session)?;

    let response = client.fetch_effective_permissions().await?;
    let evaluation = response.local_evaluation(&subject);
    let explanations: Vec<_> = evaluation.decisions().map(explain).collect();
    let mismatches = response.mismatches(&subject);

    let report = json!({
        "scope": subject.scope(),
        "trace_id": response.trace_id,
        "server": response.permissions,
        "mismatches": mismatches,
        "explanations": explanations,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}
