//! # Fleet Provisioning State Machine
//!
//! Drives a claim-authenticated session through the two-step exchange
//! that turns a factory device into a registered thing:
//! 1. Subscribe to the create-keys response topics, request a key pair
//! 2. Wait (bounded) for the issued certificate and ownership token
//! 3. Subscribe to the register-thing response topics, request registration
//! 4. Wait (bounded) for the assigned thing name
//!
//! A provisioner runs exactly once. Every failure is fatal to the run;
//! the operator retries by starting a new one.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use serde::de::DeserializeOwned;
use tracing::{debug, info, warn};

use shared::constants::{
    DEFAULT_POLL_ATTEMPTS, DEFAULT_POLL_INTERVAL_SECS, OP_CREATE_KEYS_AND_CERTIFICATE,
    OP_REGISTER_THING, PARAM_FUNCTION_TYPE, PARAM_LOCATION, PARAM_PROJECT_NAME,
    PARAM_SERIAL_NUMBER,
};
use shared::error::ProvisionResult;
use shared::topic;
use shared::types::{
    CreateKeysAndCertificateResponse, CreateKeysRequest, DeviceIdentity, ErrorResponse,
    RegisterThingRequest, RegistrationResult,
};

use crate::correlation::ResponseSlot;
use crate::transport::Connection;

// =============================================================================
// STATE
// =============================================================================

/// Steps of a provisioning run, in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProvisioningState {
    /// Claim session established, nothing requested yet
    Connected,

    /// Create-keys response topics acknowledged
    SubscribedCreateKeys,

    /// Key pair requested, waiting for the certificate
    KeysRequested,

    /// Register-thing response topics acknowledged
    SubscribedRegisterThing,

    /// Thing name assigned by the registration service
    ThingRegistered,

    /// Both exchanges succeeded
    Complete,

    /// The run aborted; the error carries the cause
    Failed,
}

/// Registration parameters describing the device being provisioned.
///
/// Keys and values flow into the provisioning template verbatim.
#[derive(Debug, Clone)]
pub struct DeviceParameters {
    /// Stable device serial (the machine id)
    pub serial_number: String,

    /// Project classification
    pub project_name: String,

    /// Function classification
    pub function_type: String,

    /// Location classification
    pub location: String,
}

impl DeviceParameters {
    fn to_template_parameters(&self) -> BTreeMap<String, String> {
        BTreeMap::from([
            (PARAM_SERIAL_NUMBER.to_string(), self.serial_number.clone()),
            (PARAM_PROJECT_NAME.to_string(), self.project_name.clone()),
            (PARAM_FUNCTION_TYPE.to_string(), self.function_type.clone()),
            (PARAM_LOCATION.to_string(), self.location.clone()),
        ])
    }
}

// =============================================================================
// PROVISIONER
// =============================================================================

/// Single-shot driver for the fleet-provisioning exchanges
pub struct FleetProvisioner {
    connection: Arc<dyn Connection>,
    template_name: String,
    parameters: DeviceParameters,
    state: ProvisioningState,
}

impl FleetProvisioner {
    /// Create a provisioner over an established claim session
    pub fn new(
        connection: Arc<dyn Connection>,
        template_name: impl Into<String>,
        parameters: DeviceParameters,
    ) -> Self {
        Self {
            connection,
            template_name: template_name.into(),
            parameters,
            state: ProvisioningState::Connected,
        }
    }

    /// Current step of the run
    pub fn state(&self) -> ProvisioningState {
        self.state
    }

    fn advance(&mut self, next: ProvisioningState) {
        debug!(from = ?self.state, to = ?next, "Provisioning step");
        self.state = next;
    }

    /// Run both exchanges to completion.
    ///
    /// Consumes the provisioner: a failed run is not resumable.
    pub async fn run(mut self) -> ProvisionResult<(DeviceIdentity, RegistrationResult)> {
        match self.drive().await {
            Ok(outcome) => {
                self.advance(ProvisioningState::Complete);
                Ok(outcome)
            }
            Err(e) => {
                self.advance(ProvisioningState::Failed);
                Err(e)
            }
        }
    }

    async fn drive(&mut self) -> ProvisionResult<(DeviceIdentity, RegistrationResult)> {
        let response = self.create_keys_and_certificate().await?;
        let identity = DeviceIdentity::from(response);
        let result = self.register_thing(&identity).await?;
        Ok((identity, result))
    }

    // =========================================================================
    // STEP 1: CREATE KEYS AND CERTIFICATE
    // =========================================================================

    async fn create_keys_and_certificate(
        &mut self,
    ) -> ProvisionResult<CreateKeysAndCertificateResponse> {
        let slot: ResponseSlot<CreateKeysAndCertificateResponse> =
            ResponseSlot::new(OP_CREATE_KEYS_AND_CERTIFICATE);
        self.subscribe_response_topics(topic::CREATE_KEYS_TOPIC, &slot)
            .await?;
        self.advance(ProvisioningState::SubscribedCreateKeys);

        let body = serde_json::to_vec(&CreateKeysRequest::default())?;
        self.connection
            .publish(topic::CREATE_KEYS_TOPIC, body)
            .await?;
        self.advance(ProvisioningState::KeysRequested);
        info!("Requested new key pair and certificate");

        let response = slot
            .wait(
                DEFAULT_POLL_ATTEMPTS,
                Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            )
            .await?;
        match &response.certificate_id {
            Some(id) => info!(certificate_id = %id, "Certificate issued"),
            None => info!("Certificate issued"),
        }
        Ok(response)
    }

    // =========================================================================
    // STEP 2: REGISTER THING
    // =========================================================================

    async fn register_thing(
        &mut self,
        identity: &DeviceIdentity,
    ) -> ProvisionResult<RegistrationResult> {
        let request_topic = topic::register_thing_topic(&self.template_name);
        let slot: ResponseSlot<RegistrationResult> = ResponseSlot::new(OP_REGISTER_THING);
        self.subscribe_response_topics(&request_topic, &slot).await?;
        self.advance(ProvisioningState::SubscribedRegisterThing);

        let request = RegisterThingRequest {
            template_name: self.template_name.clone(),
            certificate_ownership_token: identity.certificate_ownership_token.clone(),
            parameters: self.parameters.to_template_parameters(),
        };
        let body = serde_json::to_vec(&request)?;
        self.connection.publish(&request_topic, body).await?;
        info!(template = %self.template_name, "Requested thing registration");

        let result = slot
            .wait(
                DEFAULT_POLL_ATTEMPTS,
                Duration::from_secs(DEFAULT_POLL_INTERVAL_SECS),
            )
            .await?;
        self.advance(ProvisioningState::ThingRegistered);
        info!(thing_name = %result.thing_name, "Thing registered");
        Ok(result)
    }

    /// Subscribe the accepted and rejected topics for a request, routing
    /// each into the shared response slot.
    ///
    /// Malformed payloads are logged and discarded, leaving the slot
    /// empty; the bounded wait then surfaces the missing response.
    async fn subscribe_response_topics<T>(
        &self,
        request_topic: &str,
        slot: &ResponseSlot<T>,
    ) -> ProvisionResult<()>
    where
        T: DeserializeOwned + Clone + Send + 'static,
    {
        let accepted_slot = slot.clone();
        self.connection
            .subscribe(
                &topic::accepted(request_topic),
                Box::new(move |topic, payload| {
                    let response: T = match serde_json::from_slice(payload) {
                        Ok(response) => response,
                        Err(e) => {
                            warn!(topic = %topic, error = %e, "Discarding malformed accepted payload");
                            return;
                        }
                    };
                    if accepted_slot.fulfill(Ok(response)).is_err() {
                        warn!(topic = %topic, "Response dropped, slot already fulfilled");
                    }
                }),
            )
            .await?;

        let rejected_slot = slot.clone();
        self.connection
            .subscribe(
                &topic::rejected(request_topic),
                Box::new(move |topic, payload| {
                    let response: ErrorResponse = match serde_json::from_slice(payload) {
                        Ok(response) => response,
                        Err(e) => {
                            warn!(topic = %topic, error = %e, "Discarding malformed rejected payload");
                            return;
                        }
                    };
                    if rejected_slot.fulfill(Err(response)).is_err() {
                        warn!(topic = %topic, "Rejection dropped, slot already fulfilled");
                    }
                }),
            )
            .await?;

        Ok(())
    }
}
