// Identity directory backed by Keycloak
//
// - KeycloakConfig: server URL, realm and client credentials
// - KeycloakDirectory: implements eventhook_core::Directory over the admin REST API

pub mod keycloak;

pub use keycloak::{KeycloakConfig, KeycloakDirectory};
