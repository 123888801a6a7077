//! # MQTT Topic Construction
//!
//! This module builds the fleet-provisioning request/response topics and
//! resolves placeholder templates into concrete telemetry topics.

// =============================================================================
// PROVISIONING CHANNELS
// =============================================================================

/// Request topic for the create-keys-and-certificate exchange
pub const CREATE_KEYS_TOPIC: &str = "$aws/certificates/create/json";

/// Build the request topic for the register-thing exchange
pub fn register_thing_topic(template_name: &str) -> String {
    format!("$aws/provisioning-templates/{template_name}/provision/json")
}

/// Response topic carrying accepted payloads for a request topic
pub fn accepted(request_topic: &str) -> String {
    format!("{request_topic}/accepted")
}

/// Response topic carrying rejected payloads for a request topic
pub fn rejected(request_topic: &str) -> String {
    format!("{request_topic}/rejected")
}

// =============================================================================
// PLACEHOLDER SUBSTITUTION
// =============================================================================
// Topic templates from provisioning policies embed connection placeholders.
// They are resolved by literal substring replacement, not a template engine.

/// Placeholder resolved to the connecting thing's name
pub const THING_NAME_PLACEHOLDER: &str = "${iot:Connection.Thing.ThingName}";

/// Build the placeholder for a named thing attribute
pub fn attribute_placeholder(name: &str) -> String {
    format!("${{iot:Connection.Thing.Attributes[{name}]}}")
}

/// Resolve a topic template against a thing name and its attributes.
///
/// Placeholders without a matching attribute are left in place.
pub fn resolve_topic(template: &str, thing_name: &str, attributes: &[(&str, &str)]) -> String {
    let mut topic = template.replace(THING_NAME_PLACEHOLDER, thing_name);
    for (name, value) in attributes {
        topic = topic.replace(&attribute_placeholder(name), value);
    }
    topic
}
