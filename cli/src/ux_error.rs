use colored::Colorize;

#[derive(Debug)]
pub struct UxError {
    pub what: String,
    pub why: Option<String>,
    pub how_to_fix: Vec<String>,
    pub suggested_command: Option<String>,
}

impl UxError {
    pub fn new(what: impl Into<String>) -> Self {
        Self {
            what: what.into(),
            why: None,
            how_to_fix: Vec::new(),
            suggested_command: None,
        }
    }

    pub fn why(mut self, reason: impl Into<String>) -> Self {
        self.why = Some(reason.into());
        self
    }

    pub fn fix(mut self, suggestion: impl Into<String>) -> Self {
        self.how_to_fix.push(suggestion.into());
        self
    }

    pub fn suggest(mut self, cmd: impl Into<String>) -> Self {
        self.suggested_command = Some(cmd.into());
        self
    }

    pub fn display(&self) {
        eprintln!();
        eprintln!("{} {}", "error:".red().bold(), self.what.white().bold());

        if let Some(why) = &self.why {
            eprintln!("       {}", why.dimmed());
        }

        if !self.how_to_fix.is_empty() {
            eprintln!();
            eprintln!("{}", "How to fix:".yellow().bold());
            for (i, fix) in self.how_to_fix.iter().enumerate() {
                eprintln!("  {}. {}", i + 1, fix);
            }
        }

        if let Some(cmd) = &self.suggested_command {
            eprintln!();
            eprintln!("{}", "Try this:".green().bold());
            eprintln!("  $ {}", cmd.cyan());
        }
        eprintln!();
    }
}

impl std::fmt::Display for UxError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.what)
    }
}

impl std::error::Error for UxError {}

pub fn config_invalid(reason: &str) -> UxError {
    UxError::new("Configuration could not be loaded")
        .why(reason.to_string())
        .fix("Check the ATTEST_* environment variables")
        .fix("Or pass a valid TOML file with --config")
}

pub fn encryption_key_missing(reason: &str) -> UxError {
    UxError::new("No usable credential encryption key")
        .why(reason.to_string())
        .fix("Set ATTEST_ENCRYPTION_KEY to 32 raw bytes or their base64 encoding")
        .suggest("export ATTEST_ENCRYPTION_KEY=$(attest generate-key)")
}

pub fn tenant_database_unreachable(host: &str, port: u16, reason: &str) -> UxError {
    UxError::new(format!("Cannot connect to tenant database at {host}:{port}"))
        .why(reason.to_string())
        .fix("Check ATTEST_TENANT_DB_HOST and ATTEST_TENANT_DB_PORT")
        .fix("Check ATTEST_TENANT_DB_USER and ATTEST_TENANT_DB_PASSWORD")
}

pub fn client_database_unreachable(database: &str, reason: &str) -> UxError {
    UxError::new(format!("Cannot connect to client database '{database}'"))
        .why(reason.to_string())
        .fix("Verify the client database exists and accepts the given user")
        .fix("Create it first with CREATE DATABASE, then rerun provisioning")
}

pub fn invalid_id(kind: &str, value: &str) -> UxError {
    UxError::new(format!("'{value}' is not a valid {kind} id"))
        .why("Identifiers are UUIDs, e.g. 8c1b0c2e-4f3a-4b8e-9a51-2d7f0a6c9e10")
}

pub fn jwt_secret_missing() -> UxError {
    UxError::new("No token signing secret configured")
        .why("ATTEST_JWT_SECRET is not set")
        .fix("Set ATTEST_JWT_SECRET to at least 32 characters")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder_collects_fixes_in_order() {
        let err = UxError::new("boom").why("because").fix("one").fix("two").suggest("attest --help");
        assert_eq!(err.what, "boom");
        assert_eq!(err.why.as_deref(), Some("because"));
        assert_eq!(err.how_to_fix, vec!["one", "two"]);
        assert_eq!(err.suggested_command.as_deref(), Some("attest --help"));
        assert_eq!(err.to_string(), "boom");
    }

    #[test]
    fn test_invalid_id_names_the_value() {
        let err = invalid_id("client", "acme");
        assert!(err.what.contains("'acme'"));
        assert!(err.what.contains("client"));
    }

    #[test]
    fn test_display_does_not_panic() {
        tenant_database_unreachable("db.internal", 5432, "connection refused").display();
        encryption_key_missing("missing").display();
    }
}
