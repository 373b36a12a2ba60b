//! Run settings, layered from defaults, an optional TOML file, and
//! `BOOKING__*` environment variables.
//!
//! ```toml
//! duration_minutes = 45
//! time_zone = "Europe/Zurich"
//! organizer_email = "desk@practice.example"
//! ```
//!
//! Environment overrides use the field name in upper case, e.g.
//! `BOOKING__DURATION_MINUTES=45`.

use std::path::{Path, PathBuf};
use std::time::Duration as StdDuration;

use chrono::Duration;
use config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};

use crate::error::{BookingError, Result};
use crate::invite::InviteRenderer;

const ENV_PREFIX: &str = "BOOKING";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Length of every appointment.
    pub duration_minutes: u32,
    /// IANA zone name attached to invite start/end times.
    pub time_zone: String,
    pub organizer_name: String,
    pub organizer_email: String,
    /// Directory invites are written to.
    pub output_dir: PathBuf,
    /// JSON Lines file of committed bookings.
    pub ledger_path: PathBuf,
    pub summary_prefix: String,
    pub description: String,
    pub product_id: String,
    pub uid_domain: String,
    /// Age after which an abandoned ledger lock is taken over.
    pub lock_ttl_secs: u64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            duration_minutes: 30,
            time_zone: "Africa/Lagos".to_string(),
            organizer_name: "Clinic".to_string(),
            organizer_email: "reception@clinic.example".to_string(),
            output_dir: PathBuf::from("out"),
            ledger_path: PathBuf::from("existing_bookings.jsonl"),
            summary_prefix: "Initial Telehealth Consultation".to_string(),
            description:
                "Auto-generated appointment. If you need to reschedule, reply to the organizer email."
                    .to_string(),
            product_id: "-//Booking Engine//Intake Scheduler//EN".to_string(),
            uid_domain: "booking.local".to_string(),
            lock_ttl_secs: 300,
        }
    }
}

impl Settings {
    /// Defaults, then `file` (if given, must exist), then the environment.
    ///
    /// The result is not validated: callers layer their own overrides on top
    /// and then call [`validate`](Settings::validate).
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder().add_source(Config::try_from(&Settings::default())?);
        if let Some(path) = file {
            let name = path.to_str().ok_or_else(|| {
                BookingError::Config(format!("config path is not UTF-8: {}", path.display()))
            })?;
            builder = builder.add_source(File::new(name, FileFormat::Toml).required(true));
        }
        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        Ok(builder.build()?.try_deserialize()?)
    }

    /// # Errors
    /// `Config` for a zero duration or unusable organizer address,
    /// `InvalidTimezone` for an unknown zone name.
    pub fn validate(&self) -> Result<()> {
        if self.duration_minutes == 0 {
            return Err(BookingError::Config(
                "duration_minutes must be greater than zero".to_string(),
            ));
        }
        self.time_zone
            .parse::<chrono_tz::Tz>()
            .map_err(|_| BookingError::InvalidTimezone(self.time_zone.clone()))?;
        let email = self.organizer_email.trim();
        if email.is_empty() || !email.contains('@') || email.contains(char::is_whitespace) {
            return Err(BookingError::Config(format!(
                "organizer_email '{}' is not a usable address",
                self.organizer_email
            )));
        }
        Ok(())
    }

    pub fn duration(&self) -> Duration {
        Duration::minutes(i64::from(self.duration_minutes))
    }

    pub fn lock_ttl(&self) -> StdDuration {
        StdDuration::from_secs(self.lock_ttl_secs)
    }

    /// Build the invite renderer these settings describe.
    pub fn renderer(&self) -> Result<InviteRenderer> {
        Ok(InviteRenderer::new(
            self.organizer_name.clone(),
            self.organizer_email.trim(),
            &self.time_zone,
        )?
        .with_summary_prefix(self.summary_prefix.clone())
        .with_description(self.description.clone())
        .with_product_id(self.product_id.clone())
        .with_uid_domain(self.uid_domain.clone()))
    }
}
