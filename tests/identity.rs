use stackwright::identity::{
    LOCALHOST, MIN_SECRET_LEN, ProvisioningIdentity, default_email, generate_secret,
    validate_db_identifier, validate_domain, validate_email,
};
use stackwright::ProvisionError;

#[test]
fn secrets_are_long_alphanumeric_and_distinct() {
    let first = ProvisioningIdentity::new(LOCALHOST, "admin@localhost", "app", "app").unwrap();
    let second = ProvisioningIdentity::new(LOCALHOST, "admin@localhost", "app", "app").unwrap();

    for secret in [
        &first.db_root_secret,
        &first.db_app_secret,
        &second.db_root_secret,
    ] {
        assert!(secret.expose().len() >= MIN_SECRET_LEN);
        assert!(secret.expose().chars().all(|c| c.is_ascii_alphanumeric()));
    }
    assert_ne!(first.db_root_secret, first.db_app_secret);
    assert_ne!(first.db_root_secret, second.db_root_secret);
}

#[test]
fn consecutive_generations_differ() {
    assert_ne!(generate_secret(32), generate_secret(32));
    assert_eq!(generate_secret(40).len(), 40);
}

#[test]
fn accepted_domains() {
    for domain in ["localhost", "example.com", "sub.example.co", "a-b.example.org"] {
        assert_eq!(validate_domain(domain).unwrap(), domain);
    }
}

#[test]
fn rejected_domains() {
    for domain in [
        "",
        "not a domain",
        "-bad.com",
        "bad-.com",
        "example",
        "example.c0m",
        "double..dot.com",
    ] {
        let err = validate_domain(domain).unwrap_err();
        assert!(
            matches!(err, ProvisionError::Validation { field: "domain", .. }),
            "{domain:?} gave {err}"
        );
    }
}

#[test]
fn overlong_label_rejected() {
    let domain = format!("{}.com", "a".repeat(64));
    assert!(validate_domain(&domain).is_err());
}

#[test]
fn emails() {
    assert_eq!(
        validate_email(" Ops@Example.COM ").unwrap(),
        "Ops@example.com"
    );
    assert!(validate_email("admin@localhost").is_ok());
    assert!(validate_email("no-at-sign").is_err());
    assert!(validate_email("@example.com").is_err());
    assert!(validate_email("a b@example.com").is_err());
    assert!(validate_email("ops@not a domain").is_err());
}

#[test]
fn default_email_uses_domain() {
    assert_eq!(default_email("example.com"), "admin@example.com");
}

#[test]
fn db_identifiers() {
    assert_eq!(validate_db_identifier("db_user", " wp_user ").unwrap(), "wp_user");
    assert!(validate_db_identifier("db_user", "").is_err());
    assert!(validate_db_identifier("db_user", "drop;table").is_err());
    assert!(validate_db_identifier("db_name", &"x".repeat(33)).is_err());
}

#[test]
fn localhost_detection() {
    let local = ProvisioningIdentity::new("LocalHost", "admin@localhost", "app", "app").unwrap();
    assert!(local.is_localhost());

    let public = ProvisioningIdentity::new("example.com", "admin@example.com", "app", "app").unwrap();
    assert!(!public.is_localhost());
}

#[test]
fn invalid_identity_rejected() {
    assert!(ProvisioningIdentity::new("example.com", "nope", "app", "app").is_err());
    assert!(ProvisioningIdentity::new("example.com", "a@example.com", "bad user", "app").is_err());
}
