// SPDX-License-Identifier: AGPL-3.0-only
// Copyright (C) 2026 Alex Sizykh

use std::sync::Arc;

use anyhow::{Context, Result};
use russh::client::{AuthResult, Handle};
use russh::keys::PrivateKeyWithHashAlg;

use crate::app::types::Credential;

use super::error::AuthenticationFailure;
use super::handler::ClientHandler;

fn auth_succeeded(result: &AuthResult) -> bool {
    match result {
        AuthResult::Success => true,
        AuthResult::Failure {
            remaining_methods,
            partial_success,
        } => {
            tracing::debug!(
                "authentication failed (partial_success={partial_success}, remaining={remaining_methods:?})"
            );
            false
        }
    }
}

/// Authenticates `username` with a private key file or a password.
pub(super) async fn authenticate(
    handle: &mut Handle<ClientHandler>,
    username: &str,
    credential: Option<&Credential>,
) -> Result<()> {
    let result = match credential {
        Some(Credential::Identity(path)) => {
            let key = russh::keys::load_secret_key(path, None)
                .with_context(|| format!("failed to load secret key at {}", path.display()))?;
            // SHA-256 for RSA keys where the server supports it.
            let key = PrivateKeyWithHashAlg::new(
                Arc::new(key),
                handle.best_supported_rsa_hash().await?.flatten(),
            );
            handle
                .authenticate_publickey(username.to_string(), key)
                .await?
        }
        Some(Credential::Password(password)) => {
            handle
                .authenticate_password(username.to_string(), password.clone())
                .await?
        }
        None => {
            return Err(anyhow::Error::new(AuthenticationFailure)
                .context(format!("no password or identity configured for {username}")));
        }
    };
    if auth_succeeded(&result) {
        Ok(())
    } else {
        Err(AuthenticationFailure.into())
    }
}

#[cfg(test)]
mod tests {
    use super::auth_succeeded;
    use russh::client::AuthResult;
    use russh::{MethodKind, MethodSet};

    #[test]
    fn success_is_accepted() {
        assert!(auth_succeeded(&AuthResult::Success));
    }

    #[test]
    fn partial_success_is_still_a_failure() {
        let methods = [MethodKind::KeyboardInteractive];
        assert!(!auth_succeeded(&AuthResult::Failure {
            remaining_methods: MethodSet::from(methods.as_slice()),
            partial_success: true,
        }));
    }
}
