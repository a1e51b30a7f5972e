//! Accounts service gRPC client for service-to-service communication.

use async_trait::async_trait;
use std::time::SystemTime;
use tonic::Status;
use tonic::transport::Channel;

use super::auth_gate::TokenValidator;
use super::call_context::CallContext;
use super::deadline::Deadline;
use super::proto::accounts::accounts_service_client::AccountsServiceClient;
use super::proto::accounts::{
    AccountRole, LoginRequest, ValidateTokenRequest, ValidateTokenResponse,
};
use super::retry::{ChannelConfig, connect_lazy, connect_with_retry};
use crate::identity::{Identity, Role};

/// Bearer obtained by logging in, with its expiry when the server sent one.
#[derive(Debug, Clone)]
pub struct LoginToken {
    pub token: String,
    pub expires_at: Option<SystemTime>,
}

/// Accounts service client. Cloning is cheap; clones share one channel.
#[derive(Clone)]
pub struct AccountsClient {
    client: AccountsServiceClient<Channel>,
}

impl AccountsClient {
    /// Connect, retrying while the accounts service comes up.
    pub async fn connect(config: &ChannelConfig) -> Result<Self, tonic::transport::Error> {
        let channel = connect_with_retry(config, "accounts-service").await?;
        Ok(Self::from_channel(channel))
    }

    pub fn connect_lazy(config: &ChannelConfig) -> Result<Self, tonic::transport::Error> {
        Ok(Self::from_channel(connect_lazy(config)?))
    }

    pub fn from_channel(channel: Channel) -> Self {
        Self {
            client: AccountsServiceClient::new(channel),
        }
    }

    /// Validate an access token.
    #[tracing::instrument(skip(self, token))]
    pub async fn validate_token(
        &self,
        token: &str,
        deadline: Deadline,
    ) -> Result<ValidateTokenResponse, Status> {
        let request = CallContext::default()
            .with_deadline(deadline)
            .outbound(ValidateTokenRequest {
                token: token.to_string(),
            })?;

        let mut client = self.client.clone();
        let response = deadline.run(client.validate_token(request)).await?;
        Ok(response.into_inner())
    }

    /// Log in with service credentials.
    #[tracing::instrument(skip(self, password))]
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginToken, Status> {
        let request = CallContext::default().outbound(LoginRequest {
            email: email.to_string(),
            password: password.to_string(),
        })?;

        let mut client = self.client.clone();
        let response = client.login(request).await?.into_inner();
        Ok(LoginToken {
            token: response.token,
            expires_at: response
                .expires_at
                .and_then(|ts| SystemTime::try_from(ts).ok()),
        })
    }
}

#[async_trait]
impl TokenValidator for AccountsClient {
    async fn validate(&self, token: &str, deadline: Deadline) -> Result<Identity, Status> {
        let response = self.validate_token(token, deadline).await?;
        identity_from_response(&response)
    }
}

/// Turn a validation response into an identity. A response that is not
/// explicitly valid, or carries no usable role, is rejected.
#[allow(clippy::result_large_err)]
pub fn identity_from_response(response: &ValidateTokenResponse) -> Result<Identity, Status> {
    if !response.valid {
        return Err(Status::unauthenticated("invalid token"));
    }
    let role = match AccountRole::try_from(response.role) {
        Ok(AccountRole::Admin) => Role::Admin,
        Ok(AccountRole::Operation) => Role::Operation,
        _ => return Err(Status::unauthenticated("invalid token")),
    };
    Ok(Identity::new(response.subject_id.to_string(), role))
}
