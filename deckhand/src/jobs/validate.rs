//! Request validation.
//!
//! Runs before any remote or persisted side effect; every error here is a
//! rejection the client sees verbatim.

use deckhand_wire::{BuildJobRequest, DeployJobRequest, DeployPayload};

use crate::errors::DeckhandError;
use crate::store::Store;

const MAX_OBJECT_NAME: usize = 253;
const MAX_IMAGE_NAME: usize = 255;
const MAX_TAG: usize = 128;

fn invalid(message: impl Into<String>) -> DeckhandError {
    DeckhandError::ValidationError(message.into())
}

fn require(field: &str, value: &str) -> Result<(), DeckhandError> {
    if value.trim().is_empty() {
        return Err(invalid(format!("Missing required field: {}", field)));
    }
    Ok(())
}

fn require_id(field: &str, value: i64) -> Result<(), DeckhandError> {
    if value <= 0 {
        return Err(invalid(format!("Missing required field: {}", field)));
    }
    Ok(())
}

/// Lowercase alphanumerics, '-' and '.', starting and ending alphanumeric
/// (a Kubernetes object name, also valid as a container name)
pub fn validate_object_name(name: &str) -> Result<(), DeckhandError> {
    let bytes = name.as_bytes();
    let edges_ok = bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric);
    let chars_ok = bytes
        .iter()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || *b == b'-' || *b == b'.');

    if !edges_ok || !chars_ok || name.len() > MAX_OBJECT_NAME || name.contains("..") {
        return Err(invalid(format!(
            "Invalid name '{}': use lowercase letters, digits, '-' and '.'",
            name
        )));
    }
    Ok(())
}

/// Repository path of an image: lowercase alphanumerics separated by
/// '.', '_', '-' or '/'
pub fn validate_image_name(name: &str) -> Result<(), DeckhandError> {
    let bytes = name.as_bytes();
    let edges_ok = bytes.first().is_some_and(u8::is_ascii_alphanumeric)
        && bytes.last().is_some_and(u8::is_ascii_alphanumeric);
    let chars_ok = bytes.iter().all(|b| {
        b.is_ascii_lowercase() || b.is_ascii_digit() || matches!(b, b'.' | b'_' | b'-' | b'/')
    });

    if !edges_ok || !chars_ok || name.len() > MAX_IMAGE_NAME || name.contains("//") {
        return Err(invalid(format!("Invalid image name '{}'", name)));
    }
    Ok(())
}

/// Image tag: `[A-Za-z0-9_][A-Za-z0-9_.-]{0,127}`
pub fn validate_version(version: &str) -> Result<(), DeckhandError> {
    let bytes = version.as_bytes();
    let first_ok = bytes
        .first()
        .is_some_and(|b| b.is_ascii_alphanumeric() || *b == b'_');
    let chars_ok = bytes
        .iter()
        .all(|b| b.is_ascii_alphanumeric() || matches!(b, b'_' | b'.' | b'-'));

    if !first_ok || !chars_ok || version.len() > MAX_TAG {
        return Err(invalid(format!("Invalid version '{}'", version)));
    }
    Ok(())
}

pub fn validate_build(request: &BuildJobRequest) -> Result<(), DeckhandError> {
    require_id("app_id", request.app_id)?;
    require("image_name", &request.image_name)?;
    require("version", &request.version)?;
    require("repos_url", &request.repos_url)?;
    require("branch", &request.branch)?;

    validate_image_name(&request.image_name)?;
    validate_version(&request.version)?;
    Ok(())
}

/// Field and name checks, then the duplicate-name check against the store.
///
/// A deployment name held by another application on any of the requested
/// hosts is a conflict. The same name under the same application is the
/// same deployment and is overwritten.
pub async fn validate_deploy(
    store: &dyn Store,
    request: &DeployJobRequest,
) -> Result<(), DeckhandError> {
    require_id("app_id", request.app_id)?;
    require("app_name", &request.app_name)?;
    require("deployment_name", &request.deployment_name)?;
    if request.server_ids.is_empty() {
        return Err(invalid("Missing required field: server_ids"));
    }

    match &request.payload {
        DeployPayload::Manifest { yaml, .. } => require("yaml", yaml)?,
        DeployPayload::Container { image, .. } => require("image", image)?,
    }

    validate_object_name(&request.app_name)?;
    validate_object_name(&request.deployment_name)?;
    if let Some(old) = &request.replaces {
        validate_object_name(old)?;
    }

    for (i, id) in request.server_ids.iter().enumerate() {
        if request.server_ids[..i].contains(id) {
            return Err(invalid(format!("Server {} listed twice", id)));
        }
        if store.server(*id).await?.is_none() {
            return Err(invalid(format!("No server {} available for deployment", id)));
        }
    }

    let holders = store.deployments_named(&request.deployment_name).await?;
    let conflict = holders.iter().find(|existing| {
        existing.app_id != request.app_id
            && existing
                .server_ids
                .iter()
                .any(|id| request.server_ids.contains(id))
    });
    if let Some(existing) = conflict {
        return Err(invalid(format!(
            "Deployment name '{}' is already used by application {}",
            request.deployment_name, existing.app_id
        )));
    }

    Ok(())
}
