use reqwest::header::{AUTHORIZATION, HeaderName};
use serde_json::{Map, Value};

#[test]
fn builds_bearer_auth_header() {
	let headers =
		lkg_providers::auth_headers("secret", &Map::new()).expect("Failed to build headers.");
	let value = headers.get(AUTHORIZATION).expect("Missing authorization header.");

	assert_eq!(value, "Bearer secret");
}

#[test]
fn merges_default_headers() {
	let mut defaults = Map::new();

	defaults.insert("x-team".to_string(), Value::String("learning".to_string()));

	let headers = lkg_providers::auth_headers("secret", &defaults).expect("Failed to build headers.");

	assert_eq!(headers.get(HeaderName::from_static("x-team")).expect("Missing header."), "learning");
}

#[test]
fn rejects_non_string_default_headers() {
	let mut defaults = Map::new();

	defaults.insert("x-retries".to_string(), Value::from(3));

	assert!(matches!(
		lkg_providers::auth_headers("secret", &defaults),
		Err(lkg_providers::Error::InvalidConfig { .. })
	));
}
