use std::env;

use crate::scheduling::BookingRules;

#[derive(Clone, Debug)]
pub struct Config {
    pub database_url: String,
    pub bind_addr: String,
    pub session_ttl_hours: i64,
    pub patient_session_ttl_hours: i64,
    pub ticket_session_ttl_hours: i64,
    pub booking: BookingRules,
    pub mail: MailConfig,
}

#[derive(Clone, Debug)]
pub struct MailConfig {
    /// When absent, outgoing mail is only logged.
    pub resend_api_key: Option<String>,
    pub from_address: String,
}

pub const DEFAULT_MAIL_FROM: &str = "Appointment@email.lobodentdentalclinic.online";

impl Config {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = env::var("DATABASE_URL")?;
        Ok(Self::from_lookup(database_url, |key| env::var(key).ok()))
    }

    /// Everything except `DATABASE_URL` has a default; unparsable numbers fall back to it.
    pub fn from_lookup<F>(database_url: String, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let int = |key: &str, default: i64| -> i64 {
            lookup(key)
                .and_then(|s| s.trim().parse::<i64>().ok())
                .unwrap_or(default)
        };

        let bind_addr = lookup("BIND_ADDR").unwrap_or_else(|| "127.0.0.1:8080".to_string());

        let utc_offset_hours = int("CLINIC_UTC_OFFSET_HOURS", 8);
        let utc_offset_hours = if (-12..=14).contains(&utc_offset_hours) {
            utc_offset_hours as i32
        } else {
            8
        };

        let booking = BookingRules {
            utc_offset_hours,
            booking_window_days: int("BOOKING_WINDOW_DAYS", 30).max(0),
            daily_capacity: int("DAILY_CAPACITY", 7).max(1),
            slot_capacity: int("SLOT_CAPACITY", 1).max(1),
        };

        let mail = MailConfig {
            resend_api_key: lookup("RESEND_API_KEY").filter(|k| !k.trim().is_empty()),
            from_address: lookup("MAIL_FROM").unwrap_or_else(|| DEFAULT_MAIL_FROM.to_string()),
        };

        Self {
            database_url,
            bind_addr,
            session_ttl_hours: int("SESSION_TTL_HOURS", 24),
            patient_session_ttl_hours: int("PATIENT_SESSION_TTL_HOURS", 24 * 3),
            ticket_session_ttl_hours: int("TICKET_SESSION_TTL_HOURS", 24),
            booking,
            mail,
        }
    }
}
