//! Input validators for prompt values
//!
//! Validation returns a human-readable rejection message; the prompt loop
//! prints it and asks again, and the non-interactive path turns it into a
//! configuration error.

/// Validation rule attached to a prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Validator {
    /// Anything, including empty
    Any,
    NonEmpty,
    Integer,
    /// TCP port, 1-65535
    Port,
    /// Literal `true` or `false`
    Boolean,
    /// DNS name or IP address
    Hostname,
    /// Comma-separated hostnames, none empty
    HostList,
    AbsolutePath,
    /// Letters, digits, underscores
    Identifier,
    /// Membership in a fixed set
    OneOf(&'static [&'static str]),
}

impl Validator {
    pub fn validate(&self, value: &str) -> Result<(), String> {
        match self {
            Validator::Any => Ok(()),
            Validator::NonEmpty => {
                if value.trim().is_empty() {
                    Err("value must not be empty".to_string())
                } else {
                    Ok(())
                }
            }
            Validator::Integer => value
                .parse::<i64>()
                .map(|_| ())
                .map_err(|_| format!("'{value}' is not an integer")),
            Validator::Port => match value.parse::<u32>() {
                Ok(port) if (1..=65535).contains(&port) => Ok(()),
                _ => Err(format!("'{value}' is not a TCP port (1-65535)")),
            },
            Validator::Boolean => {
                if value == "true" || value == "false" {
                    Ok(())
                } else {
                    Err(format!("'{value}' must be 'true' or 'false'"))
                }
            }
            Validator::Hostname => validate_hostname(value),
            Validator::HostList => {
                if value.trim().is_empty() {
                    return Err("host list must not be empty".to_string());
                }
                for part in value.split(',') {
                    validate_hostname(part.trim())?;
                }
                Ok(())
            }
            Validator::AbsolutePath => {
                if value.starts_with('/') {
                    Ok(())
                } else {
                    Err(format!("'{value}' is not an absolute path"))
                }
            }
            Validator::Identifier => {
                if !value.is_empty()
                    && value.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
                {
                    Ok(())
                } else {
                    Err(format!(
                        "'{value}' may only contain letters, digits, and underscores"
                    ))
                }
            }
            Validator::OneOf(choices) => {
                if choices.contains(&value) {
                    Ok(())
                } else {
                    Err(format!(
                        "'{value}' must be one of: {}",
                        choices.join(", ")
                    ))
                }
            }
        }
    }
}

fn validate_hostname(value: &str) -> Result<(), String> {
    if value.is_empty() {
        return Err("hostname must not be empty".to_string());
    }
    let valid = value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_' | ':'));
    if valid {
        Ok(())
    } else {
        Err(format!("'{value}' is not a valid hostname or address"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_empty() {
        assert!(Validator::NonEmpty.validate("x").is_ok());
        assert!(Validator::NonEmpty.validate("").is_err());
        assert!(Validator::NonEmpty.validate("   ").is_err());
    }

    #[test]
    fn test_port_bounds() {
        assert!(Validator::Port.validate("2112").is_ok());
        assert!(Validator::Port.validate("65535").is_ok());
        assert!(Validator::Port.validate("0").is_err());
        assert!(Validator::Port.validate("65536").is_err());
        assert!(Validator::Port.validate("http").is_err());
    }

    #[test]
    fn test_boolean_is_strict() {
        assert!(Validator::Boolean.validate("true").is_ok());
        assert!(Validator::Boolean.validate("false").is_ok());
        assert!(Validator::Boolean.validate("yes").is_err());
        assert!(Validator::Boolean.validate("True").is_err());
    }

    #[test]
    fn test_hostname_accepts_fqdn_and_ipv6() {
        assert!(Validator::Hostname.validate("db1.example.com").is_ok());
        assert!(Validator::Hostname.validate("10.0.0.1").is_ok());
        assert!(Validator::Hostname.validate("fe80::1").is_ok());
        assert!(Validator::Hostname.validate("db one").is_err());
        assert!(Validator::Hostname.validate("").is_err());
    }

    #[test]
    fn test_host_list_checks_each_entry() {
        assert!(Validator::HostList.validate("db1,db2,db3").is_ok());
        assert!(Validator::HostList.validate("db1, db2").is_ok());
        assert!(Validator::HostList.validate("db1,,db3").is_err());
        assert!(Validator::HostList.validate("").is_err());
    }

    #[test]
    fn test_absolute_path() {
        assert!(Validator::AbsolutePath.validate("/opt/drover").is_ok());
        assert!(Validator::AbsolutePath.validate("opt/drover").is_err());
    }

    #[test]
    fn test_identifier() {
        assert!(Validator::Identifier.validate("east_1").is_ok());
        assert!(Validator::Identifier.validate("east-1").is_err());
        assert!(Validator::Identifier.validate("").is_err());
    }

    #[test]
    fn test_one_of() {
        let v = Validator::OneOf(&["master-slave", "composite"]);
        assert!(v.validate("master-slave").is_ok());
        assert!(v.validate("star").is_err());
    }

    #[test]
    fn test_integer_accepts_negatives() {
        assert!(Validator::Integer.validate("-100").is_ok());
        assert!(Validator::Integer.validate("10x").is_err());
    }
}
