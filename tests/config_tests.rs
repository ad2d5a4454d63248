use issue_desk::{
    AppConfig,
    config::{ConfigError, Env},
};
use serial_test::serial;
use std::{env, panic};

const REQUIRED: [(&str, &str); 5] = [
    ("DB_USER", "issues"),
    ("DB_PASSWORD", "p@ss/word"),
    ("DB_HOST", "db.internal"),
    ("DB_NAME", "issues"),
    ("JWT_SECRET_KEY", "integration-secret"),
];

const TOUCHED: [&str; 13] = [
    "ENV",
    "HOST",
    "DB_USER",
    "DB_PASSWORD",
    "DB_HOST",
    "DB_NAME",
    "JWT_SECRET_KEY",
    "DEBUG",
    "LOG_LEVEL",
    "PORT",
    "MAX_IMAGE_SIZE_KB",
    "ADMIN_EMAIL",
    "ADMIN_PASSWORD",
];

// --- Setup/Teardown Utilities ---

/// Runs `test` with a clean slate for every variable in `TOUCHED`, then
/// restores whatever the process had before.
fn run_with_env<T, R>(test: T) -> R
where
    T: FnOnce() -> R + panic::UnwindSafe,
{
    let originals: Vec<(&str, Option<String>)> =
        TOUCHED.iter().map(|&var| (var, env::var(var).ok())).collect();

    unsafe {
        for var in TOUCHED {
            env::remove_var(var);
        }
        env::set_var("ENV", "testing");
    }

    let result = panic::catch_unwind(test);

    for (key, original) in originals.into_iter().rev() {
        unsafe {
            match original {
                Some(value) => env::set_var(key, value),
                None => env::remove_var(key),
            }
        }
    }

    match result {
        Ok(value) => value,
        Err(e) => panic::resume_unwind(e),
    }
}

fn set_required() {
    unsafe {
        for (key, value) in REQUIRED {
            env::set_var(key, value);
        }
    }
}

// --- Tests ---

#[test]
#[serial]
fn missing_secret_fails_fast() {
    let result = run_with_env(|| {
        set_required();
        unsafe { env::remove_var("JWT_SECRET_KEY") };
        AppConfig::load()
    });

    assert_eq!(result.unwrap_err(), ConfigError::Missing("JWT_SECRET_KEY"));
}

#[test]
#[serial]
fn defaults_apply_when_optional_values_are_absent() {
    let config = run_with_env(|| {
        set_required();
        AppConfig::load()
    })
    .unwrap();

    assert_eq!(config.env, Env::Testing);
    assert_eq!(config.port, 8000);
    assert_eq!(config.log_level, "info");
    assert_eq!(config.upload.max_image_size_kb, 5120);
    assert_eq!(config.default_page_size, 50);
    assert!(config.bootstrap_admin.is_none());
    // Credentials are percent-encoded into the connection URL.
    assert!(config.database.url().contains("p%40ss%2Fword"));
}

#[test]
#[serial]
fn overrides_are_parsed() {
    let config = run_with_env(|| {
        set_required();
        unsafe {
            env::set_var("DEBUG", "true");
            env::set_var("LOG_LEVEL", "WARNING");
            env::set_var("PORT", "9100");
            env::set_var("MAX_IMAGE_SIZE_KB", "64");
            env::set_var("ADMIN_EMAIL", "root@example.com");
            env::set_var("ADMIN_PASSWORD", "changeme-now");
        }
        AppConfig::load()
    })
    .unwrap();

    assert!(config.debug);
    assert_eq!(config.bind_address(), "0.0.0.0:9100");
    assert_eq!(config.upload.max_bytes(), 64 * 1024);
    assert_eq!(
        config.bootstrap_admin.map(|admin| admin.email),
        Some("root@example.com".to_string())
    );
}

#[test]
#[serial]
fn unparsable_values_are_rejected() {
    let result = run_with_env(|| {
        set_required();
        unsafe { env::set_var("PORT", "eighty") };
        AppConfig::load()
    });

    assert!(matches!(result, Err(ConfigError::Invalid { name: "PORT", .. })));
}

#[test]
#[serial]
fn unknown_environment_is_rejected() {
    let result = run_with_env(|| {
        set_required();
        unsafe { env::set_var("ENV", "staging") };
        AppConfig::load()
    });

    assert!(matches!(result, Err(ConfigError::Invalid { name: "ENV", .. })));
}
