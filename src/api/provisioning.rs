//! Device provisioning handshake.
//!
//! A new device links itself to an existing account over a transient socket:
//!
//! 1. The server sends an *address* request carrying a provisioning id. The
//!    session turns it into a linking URI (id plus the session public key)
//!    and hands it to the UI, which shows it to the primary device.
//! 2. The primary device encrypts the account bundle to that public key. The
//!    server relays it as a *message* request. The session decrypts it, asks
//!    the local user to confirm the number, and registers the account.
//!
//! Every meaningful request is acknowledged right away. The outcome settles
//! once; later requests are acknowledged and ignored. The socket itself is
//! owned by the transport layer and is never closed here.

use std::sync::Arc;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use futures::{Stream, StreamExt};

use super::account::{AccountBootstrapper, RegistrationError};
use super::collaborators::{CryptoError, Decryptor, KeyGenerator, ProvisioningPrompt};
use super::config::HandshakeConfig;
use super::types::{Account, KeyPair};
use crate::utils::redact;

// ═══════════════════════════════════════════════════════════════
// ERROR TYPE
// ═══════════════════════════════════════════════════════════════

#[derive(thiserror::Error, Debug)]
pub enum ProvisioningError {
    #[error("Failed to generate provisioning key pair: {0}")]
    KeyGeneration(#[source] CryptoError),
    #[error("Failed to decrypt provisioning envelope: {0}")]
    ProvisioningDecryptFailed(#[source] CryptoError),
    #[error("Device linking was rejected")]
    ProvisioningRejected,
    #[error("Account registration failed: {0}")]
    RegistrationError(#[from] RegistrationError),
    #[error("Provisioning socket closed before the handshake completed")]
    SocketClosed,
}

// ═══════════════════════════════════════════════════════════════
// SOCKET REQUESTS
// ═══════════════════════════════════════════════════════════════

/// Sends the answer to one socket request.
pub trait Responder: Send {
    fn respond(self: Box<Self>, status: u16, message: &str);
}

/// A request delivered by the provisioning socket.
pub struct IncomingRequest {
    pub verb: String,
    pub path: String,
    pub body: Vec<u8>,
    responder: Box<dyn Responder>,
}

impl IncomingRequest {
    pub fn new(
        verb: impl Into<String>,
        path: impl Into<String>,
        body: Vec<u8>,
        responder: impl Responder + 'static,
    ) -> Self {
        Self {
            verb: verb.into(),
            path: path.into(),
            body,
            responder: Box::new(responder),
        }
    }
}

// ═══════════════════════════════════════════════════════════════
// SESSION
// ═══════════════════════════════════════════════════════════════

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ProvisioningState {
    AwaitingAddressRequest,
    AwaitingInitMessage,
    Decrypting,
    Confirming,
    Bootstrapping,
    Done,
    Failed,
}

/// One linking attempt. Discard it once the outcome has settled.
pub struct ProvisioningSession {
    config: HandshakeConfig,
    key_pair: KeyPair,
    decryptor: Arc<dyn Decryptor>,
    prompt: Arc<dyn ProvisioningPrompt>,
    bootstrapper: Arc<dyn AccountBootstrapper>,
    history: Vec<ProvisioningState>,
    settled: bool,
}

impl ProvisioningSession {
    pub fn new(
        config: HandshakeConfig,
        key_pair: KeyPair,
        decryptor: Arc<dyn Decryptor>,
        prompt: Arc<dyn ProvisioningPrompt>,
        bootstrapper: Arc<dyn AccountBootstrapper>,
    ) -> Self {
        Self {
            config,
            key_pair,
            decryptor,
            prompt,
            bootstrapper,
            history: vec![ProvisioningState::AwaitingAddressRequest],
            settled: false,
        }
    }

    pub fn state(&self) -> ProvisioningState {
        self.history
            .last()
            .copied()
            .unwrap_or(ProvisioningState::AwaitingAddressRequest)
    }

    /// Every state the session has been in, oldest first.
    pub fn history(&self) -> &[ProvisioningState] {
        &self.history
    }

    pub fn public_key(&self) -> &[u8] {
        &self.key_pair.public_key
    }

    /// Linking URI for `provisioning_id`:
    /// `<prefix>?uuid=<id>&pub_key=<base64 public key>`, query-encoded.
    pub fn link_uri(&self, provisioning_id: &str) -> String {
        let query = url::form_urlencoded::Serializer::new(String::new())
            .append_pair("uuid", provisioning_id)
            .append_pair("pub_key", &STANDARD.encode(&self.key_pair.public_key))
            .finish();
        format!("{}?{}", self.config.link_prefix, query)
    }

    fn transition(&mut self, next: ProvisioningState) {
        log::debug!("Provisioning: {:?} -> {:?}", self.state(), next);
        self.history.push(next);
    }

    /// Process one socket request.
    ///
    /// Returns the handshake outcome the first time it settles and `None`
    /// for every other request.
    pub async fn handle_request(
        &mut self,
        request: IncomingRequest,
    ) -> Option<Result<Account, ProvisioningError>> {
        let IncomingRequest {
            verb,
            path,
            body,
            responder,
        } = request;

        if verb != self.config.verb {
            log::info!("Unknown provisioning request {} {}", verb, path);
            return None;
        }

        if path == self.config.address_path {
            self.handle_address(body, responder);
            None
        } else if path == self.config.message_path {
            responder.respond(200, "OK");
            if self.settled {
                log::debug!("Ignoring provisioning message after the handshake settled");
                return None;
            }
            self.settled = true;
            Some(self.complete(&body).await)
        } else {
            log::info!("Unknown provisioning request {} {}", verb, path);
            None
        }
    }

    fn handle_address(&mut self, body: Vec<u8>, responder: Box<dyn Responder>) {
        let provisioning_id = match String::from_utf8(body) {
            Ok(id) if !id.trim().is_empty() => id.trim().to_string(),
            _ => {
                log::warn!("Malformed provisioning address request");
                responder.respond(400, "Bad Request");
                return;
            }
        };
        if !self.settled {
            let uri = self.link_uri(&provisioning_id);
            self.prompt.show_link(&uri);
        }
        responder.respond(200, "OK");
        if self.state() == ProvisioningState::AwaitingAddressRequest {
            self.transition(ProvisioningState::AwaitingInitMessage);
        }
    }

    async fn complete(&mut self, envelope: &[u8]) -> Result<Account, ProvisioningError> {
        let outcome = self.decrypt_confirm_register(envelope).await;
        match outcome {
            Ok(account) => {
                self.transition(ProvisioningState::Done);
                log::info!("Linked device {} of {}", account.device_id, redact(&account.number));
                Ok(account)
            }
            Err(error) => {
                log::warn!("Provisioning failed in {:?}: {}", self.state(), error);
                self.transition(ProvisioningState::Failed);
                Err(error)
            }
        }
    }

    async fn decrypt_confirm_register(
        &mut self,
        envelope: &[u8],
    ) -> Result<Account, ProvisioningError> {
        self.transition(ProvisioningState::Decrypting);
        let provision = self
            .decryptor
            .decrypt_provisioning_envelope(envelope, &self.key_pair.private_key)
            .await
            .map_err(ProvisioningError::ProvisioningDecryptFailed)?;

        self.transition(ProvisioningState::Confirming);
        self.prompt
            .confirm_number(&provision.number)
            .await
            .map_err(|_| ProvisioningError::ProvisioningRejected)?;

        self.transition(ProvisioningState::Bootstrapping);
        let account = self
            .bootstrapper
            .create_account(
                &provision.number,
                &provision.provisioning_code,
                provision.identity_key_pair,
                false,
            )
            .await?;
        Ok(account)
    }

    /// Drive the session from `socket` until the outcome settles.
    ///
    /// The socket stays with the caller; requests still queued on it after
    /// the outcome are not consumed.
    pub async fn run<S>(&mut self, socket: &mut S) -> Result<Account, ProvisioningError>
    where
        S: Stream<Item = IncomingRequest> + Unpin,
    {
        while let Some(request) = socket.next().await {
            if let Some(outcome) = self.handle_request(request).await {
                return outcome;
            }
        }
        log::warn!("Provisioning socket closed in {:?}", self.state());
        if !self.settled {
            self.settled = true;
            self.transition(ProvisioningState::Failed);
        }
        Err(ProvisioningError::SocketClosed)
    }
}

/// Link this device to an existing account.
///
/// Generates the transient key pair, runs the handshake over `socket`, and
/// returns the account registered on this device.
pub async fn register_second_device<S>(
    config: HandshakeConfig,
    keys: &dyn KeyGenerator,
    decryptor: Arc<dyn Decryptor>,
    prompt: Arc<dyn ProvisioningPrompt>,
    bootstrapper: Arc<dyn AccountBootstrapper>,
    socket: &mut S,
) -> Result<Account, ProvisioningError>
where
    S: Stream<Item = IncomingRequest> + Unpin,
{
    let key_pair = keys
        .generate_key_pair()
        .map_err(ProvisioningError::KeyGeneration)?;
    let mut session = ProvisioningSession::new(config, key_pair, decryptor, prompt, bootstrapper);
    session.run(socket).await
}
