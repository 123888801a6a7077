//! # Shared Data Types for the Fleet Provisioning Agent
//!
//! This module defines the wire-level payloads exchanged with the
//! fleet-provisioning service, the device identity they produce, and the
//! telemetry message shape. Serde renames pin the JSON contract; struct
//! field names stay idiomatic.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::error::ProvisionError;

// =============================================================================
// CREATE KEYS AND CERTIFICATE
// =============================================================================

/// Request body for the create-keys-and-certificate exchange.
///
/// The service expects an empty JSON object, so this carries no fields.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CreateKeysRequest {}

/// Accepted payload of the create-keys-and-certificate exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateKeysAndCertificateResponse {
    /// Identifier the service assigned to the new certificate
    #[serde(
        rename = "certificateId",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub certificate_id: Option<String>,

    /// PEM-encoded device certificate
    #[serde(rename = "certificatePem")]
    pub certificate_pem: String,

    /// PEM-encoded private key
    #[serde(rename = "privateKey")]
    pub private_key: String,

    /// Proof of key ownership, passed back in the register-thing request
    #[serde(rename = "certificateOwnershipToken")]
    pub certificate_ownership_token: String,
}

/// Permanent identity produced by an accepted create-keys response.
///
/// Immutable once built; handed to persistence after registration succeeds.
#[derive(Debug, Clone)]
pub struct DeviceIdentity {
    /// PEM-encoded device certificate
    pub certificate_pem: String,

    /// PEM-encoded private key
    pub private_key_pem: String,

    /// Ownership token for the register-thing step
    pub certificate_ownership_token: String,
}

impl From<CreateKeysAndCertificateResponse> for DeviceIdentity {
    fn from(response: CreateKeysAndCertificateResponse) -> Self {
        Self {
            certificate_pem: response.certificate_pem,
            private_key_pem: response.private_key,
            certificate_ownership_token: response.certificate_ownership_token,
        }
    }
}

// =============================================================================
// REGISTER THING
// =============================================================================

/// Request body for the register-thing exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterThingRequest {
    /// Name of the provisioning template to instantiate
    #[serde(rename = "templateName")]
    pub template_name: String,

    /// Ownership token from the create-keys step
    #[serde(rename = "certificateOwnershipToken")]
    pub certificate_ownership_token: String,

    /// Template parameters; keys are template-defined and case-sensitive.
    ///
    /// A BTreeMap keeps serialization order deterministic.
    pub parameters: BTreeMap<String, String>,
}

/// Accepted payload of the register-thing exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationResult {
    /// Thing name assigned by the registration service
    #[serde(rename = "thingName")]
    pub thing_name: String,

    /// Device configuration attached by the template, if any
    #[serde(rename = "deviceConfiguration", default)]
    pub device_configuration: BTreeMap<String, String>,
}

// =============================================================================
// REJECTION
// =============================================================================

/// Rejected payload shared by both provisioning exchanges
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// HTTP-style status code
    #[serde(rename = "statusCode")]
    pub status_code: u16,

    /// Short machine-readable error code
    #[serde(rename = "errorCode")]
    pub error_code: String,

    /// Human-readable explanation
    #[serde(rename = "errorMessage")]
    pub error_message: String,
}

impl ErrorResponse {
    /// Convert a service rejection into the error surfaced to the caller
    pub fn into_rejection(self, operation: &str) -> ProvisionError {
        ProvisionError::ServiceRejected {
            operation: operation.to_string(),
            error_code: self.error_code,
            error_message: self.error_message,
            status_code: self.status_code,
        }
    }
}

// =============================================================================
// TELEMETRY
// =============================================================================

/// Single telemetry reading published on the sensor topic
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryMessage {
    /// Thing name of the publishing device
    #[serde(rename = "ThingName")]
    pub thing_name: String,

    /// Local reading time, formatted per the telemetry timestamp format
    #[serde(rename = "Timestamp")]
    pub timestamp: String,

    /// Temperature reading in degrees Celsius
    #[serde(rename = "TempC")]
    pub temp_c: f64,

    /// Project classification of the device
    #[serde(rename = "ProjectName")]
    pub project_name: String,

    /// Location classification of the device
    #[serde(rename = "Location")]
    pub location: String,

    /// Function classification of the device
    #[serde(rename = "FunctionType")]
    pub function_type: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_create_keys_request_is_empty_object() {
        let body = serde_json::to_string(&CreateKeysRequest::default()).unwrap();
        assert_eq!(body, "{}");
    }

    #[test]
    fn test_device_identity_from_accepted_payload() {
        let payload = r#"{
            "certificatePem": "CERT1",
            "privateKey": "KEY1",
            "certificateOwnershipToken": "TOK1"
        }"#;
        let response: CreateKeysAndCertificateResponse = serde_json::from_str(payload).unwrap();
        assert!(response.certificate_id.is_none());

        let identity = DeviceIdentity::from(response);
        assert_eq!(identity.certificate_pem, "CERT1");
        assert_eq!(identity.private_key_pem, "KEY1");
        assert_eq!(identity.certificate_ownership_token, "TOK1");
    }

    #[test]
    fn test_register_thing_request_wire_shape() {
        let mut parameters = BTreeMap::new();
        parameters.insert("SerialNumber".to_string(), "ab12cd34".to_string());
        parameters.insert("ProjectName".to_string(), "Greenhouse".to_string());
        let request = RegisterThingRequest {
            template_name: "GreenhouseTemplate".to_string(),
            certificate_ownership_token: "TOK1".to_string(),
            parameters,
        };

        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&request).unwrap()).unwrap();
        assert_eq!(json["templateName"], "GreenhouseTemplate");
        assert_eq!(json["certificateOwnershipToken"], "TOK1");
        assert_eq!(json["parameters"]["SerialNumber"], "ab12cd34");
    }

    #[test]
    fn test_registration_result_without_device_configuration() {
        let payload = r#"{"thingName": "iot_ab12cd34"}"#;
        let result: RegistrationResult = serde_json::from_str(payload).unwrap();
        assert_eq!(result.thing_name, "iot_ab12cd34");
        assert!(result.device_configuration.is_empty());
    }

    #[test]
    fn test_error_response_into_rejection() {
        let payload = r#"{
            "statusCode": 404,
            "errorCode": "ResourceNotFound",
            "errorMessage": "template missing"
        }"#;
        let response: ErrorResponse = serde_json::from_str(payload).unwrap();
        let err = response.into_rejection("RegisterThing");
        match err {
            ProvisionError::ServiceRejected {
                operation,
                error_code,
                error_message,
                status_code,
            } => {
                assert_eq!(operation, "RegisterThing");
                assert_eq!(error_code, "ResourceNotFound");
                assert_eq!(error_message, "template missing");
                assert_eq!(status_code, 404);
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn test_telemetry_message_key_casing() {
        let message = TelemetryMessage {
            thing_name: "iot_ab12cd34".to_string(),
            timestamp: "2024-05-01 12:00:00".to_string(),
            temp_c: 21.0,
            project_name: "Greenhouse".to_string(),
            location: "Rooftop".to_string(),
            function_type: "TempSensor".to_string(),
        };
        let json: serde_json::Value =
            serde_json::from_str(&serde_json::to_string(&message).unwrap()).unwrap();
        assert_eq!(json["ThingName"], "iot_ab12cd34");
        assert_eq!(json["TempC"], 21.0);
        assert_eq!(json["FunctionType"], "TempSensor");
    }
}
