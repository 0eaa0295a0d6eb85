//! Audible alerts for significant moves.
//!
//! Alerts are handed to a worker task so the streaming pipeline never waits on audio.
//! Failures stay inside the worker and are only logged.

use crate::error::NotifyError;
use crate::market::types::{PriceDirection, PriceUpdate};
use std::io::Write;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const TONE_UP_HZ: u32 = 880;
pub const TONE_DOWN_HZ: u32 = 440;
pub const TONE_FLAT_HZ: u32 = 660;
pub const TONE_DURATION_MS: u64 = 150;
/// Alerts allowed to wait behind the one being played; anything beyond is dropped.
pub const NOTIFICATION_QUEUE_DEPTH: usize = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Tone {
    pub direction: PriceDirection,
    pub frequency_hz: u32,
    pub duration: Duration,
}

impl Tone {
    pub fn for_direction(direction: PriceDirection) -> Self {
        let frequency_hz = match direction {
            PriceDirection::Up => TONE_UP_HZ,
            PriceDirection::Down => TONE_DOWN_HZ,
            PriceDirection::Flat => TONE_FLAT_HZ,
        };
        Self {
            direction,
            frequency_hz,
            duration: Duration::from_millis(TONE_DURATION_MS),
        }
    }
}

/// Audio backend. Implementations may fail freely; the worker swallows errors.
pub trait Notifier: Send + Sync + 'static {
    fn play_tone(&self, tone: Tone) -> Result<(), NotifyError>;
    fn speak(&self, text: &str) -> Result<(), NotifyError>;
}

/// Rings the terminal bell and writes the announcement to the log.
#[derive(Debug, Default)]
pub struct TerminalNotifier;

impl Notifier for TerminalNotifier {
    fn play_tone(&self, tone: Tone) -> Result<(), NotifyError> {
        let mut stderr = std::io::stderr().lock();
        stderr.write_all(b"\x07")?;
        stderr.flush()?;
        debug!(frequency_hz = tone.frequency_hz, "alert tone");
        Ok(())
    }

    fn speak(&self, text: &str) -> Result<(), NotifyError> {
        info!(target: "quote_stream::speech", "{text}");
        Ok(())
    }
}

/// Spoken units and precision for a quote currency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Narration {
    pub unit: String,
    pub decimals: usize,
}

impl Narration {
    pub fn for_currency(currency: &str) -> Self {
        let (unit, decimals) = match currency.to_ascii_uppercase().as_str() {
            "USD" => ("dollars", 2),
            "EUR" => ("euros", 2),
            "GBP" => ("pounds", 2),
            "INR" => ("rupees", 2),
            "AED" => ("dirhams", 2),
            "JPY" => ("yen", 0),
            "AUD" => ("Australian dollars", 2),
            "CAD" => ("Canadian dollars", 2),
            "CHF" => ("Swiss francs", 2),
            other => {
                return Self {
                    unit: other.to_string(),
                    decimals: 2,
                }
            }
        };
        Self {
            unit: unit.to_string(),
            decimals,
        }
    }
}

pub fn asset_name(asset: &str) -> String {
    match asset.to_ascii_uppercase().as_str() {
        "XAU" => "Gold".to_string(),
        "XAG" => "Silver".to_string(),
        "XPT" => "Platinum".to_string(),
        "XPD" => "Palladium".to_string(),
        other => other.to_string(),
    }
}

pub fn announcement_text(update: &PriceUpdate) -> String {
    let narration = Narration::for_currency(&update.currency);
    let price = group_thousands(update.price, narration.decimals);
    let change = group_thousands(update.change.abs(), narration.decimals);
    let percent = format!("{:.2}", update.change_percent.abs());
    let name = asset_name(&update.asset);

    match update.direction() {
        PriceDirection::Up => format!(
            "{name} at {price} {unit}, up {change} {unit}, {percent} percent",
            unit = narration.unit
        ),
        PriceDirection::Down => format!(
            "{name} at {price} {unit}, down {change} {unit}, {percent} percent",
            unit = narration.unit
        ),
        PriceDirection::Flat => format!("{name} unchanged at {price} {}", narration.unit),
    }
}

fn group_thousands(value: f64, decimals: usize) -> String {
    let formatted = format!("{value:.decimals$}");
    let (integer, fraction) = match formatted.split_once('.') {
        Some((integer, fraction)) => (integer, Some(fraction)),
        None => (formatted.as_str(), None),
    };
    let (sign, digits) = match integer.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", integer),
    };

    let mut grouped = String::with_capacity(formatted.len() + digits.len() / 3);
    for (index, digit) in digits.chars().enumerate() {
        if index > 0 && (digits.len() - index) % 3 == 0 {
            grouped.push(',');
        }
        grouped.push(digit);
    }

    match fraction {
        Some(fraction) => format!("{sign}{grouped}.{fraction}"),
        None => format!("{sign}{grouped}"),
    }
}

#[derive(Debug)]
struct NotificationJob {
    tone: Tone,
    text: String,
}

/// Threshold gate in front of the notification worker.
#[derive(Debug, Clone)]
pub struct NotificationDispatcher {
    threshold_percent: f64,
    sound_enabled: Arc<AtomicBool>,
    jobs: mpsc::Sender<NotificationJob>,
}

impl NotificationDispatcher {
    /// Spawns the worker on the current runtime. It exits when `cancel_token` fires or
    /// every dispatcher clone is dropped.
    pub fn spawn(
        notifier: Arc<dyn Notifier>,
        threshold_percent: f64,
        gap: Duration,
        sound_enabled: Arc<AtomicBool>,
        cancel_token: CancellationToken,
    ) -> Self {
        let (jobs, inbox) = mpsc::channel(NOTIFICATION_QUEUE_DEPTH);
        tokio::spawn(run_notification_worker(notifier, gap, inbox, cancel_token));
        Self {
            threshold_percent,
            sound_enabled,
            jobs,
        }
    }

    pub fn sound_enabled(&self) -> bool {
        self.sound_enabled.load(Ordering::Relaxed)
    }

    pub fn set_sound_enabled(&self, enabled: bool) {
        self.sound_enabled.store(enabled, Ordering::Relaxed);
    }

    pub fn should_notify(&self, update: &PriceUpdate) -> bool {
        self.sound_enabled() && update.change_percent.abs() >= self.threshold_percent
    }

    /// Queues a tone and an announcement when the move clears the threshold.
    /// Returns whether anything was queued.
    pub fn maybe_notify(&self, update: &PriceUpdate) -> bool {
        if !self.should_notify(update) {
            return false;
        }

        let job = NotificationJob {
            tone: Tone::for_direction(update.direction()),
            text: announcement_text(update),
        };
        match self.jobs.try_send(job) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                debug!("notification worker busy, alert dropped");
                false
            }
            Err(TrySendError::Closed(_)) => {
                debug!("notification worker stopped, alert dropped");
                false
            }
        }
    }
}

async fn run_notification_worker(
    notifier: Arc<dyn Notifier>,
    gap: Duration,
    mut inbox: mpsc::Receiver<NotificationJob>,
    cancel_token: CancellationToken,
) {
    loop {
        let job = tokio::select! {
            _ = cancel_token.cancelled() => break,
            next = inbox.recv() => match next {
                Some(job) => job,
                None => break,
            },
        };

        if let Err(error) = notifier.play_tone(job.tone) {
            warn!("alert tone failed: {error}");
        }

        tokio::select! {
            _ = cancel_token.cancelled() => break,
            _ = tokio::time::sleep(gap) => {}
        }

        if let Err(error) = notifier.speak(&job.text) {
            warn!("price announcement failed: {error}");
        }
    }
}
