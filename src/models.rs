use chrono::{DateTime, Days, Duration, Months, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::ops::{Index, IndexMut};

/// A point-in-time cost observation.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Sample {
    pub actual: f64,
    #[serde(rename = "request")]
    pub requested: f64,
    #[serde(rename = "time")]
    pub at: i64,
}

impl Sample {
    pub fn new(actual: f64, requested: f64, at: i64) -> Self {
        Self {
            actual,
            requested,
            at,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Tier {
    Hour,
    Day,
    Month,
    Year,
}

impl Tier {
    pub const ALL: [Tier; 4] = [Tier::Hour, Tier::Day, Tier::Month, Tier::Year];

    pub fn as_label(self) -> &'static str {
        match self {
            Tier::Hour => "hour",
            Tier::Day => "day",
            Tier::Month => "month",
            Tier::Year => "year",
        }
    }

    /// The next coarser tier, if any.
    pub fn coarser(self) -> Option<Tier> {
        match self {
            Tier::Hour => Some(Tier::Day),
            Tier::Day => Some(Tier::Month),
            Tier::Month => Some(Tier::Year),
            Tier::Year => None,
        }
    }

    /// Start of the window ending at `now`. Hours are a fixed 3600 seconds,
    /// the other tiers step back on the calendar.
    pub fn window_start(self, now: DateTime<Utc>) -> DateTime<Utc> {
        let start = match self {
            Tier::Hour => now.checked_sub_signed(Duration::seconds(3600)),
            Tier::Day => now.checked_sub_days(Days::new(1)),
            Tier::Month => now.checked_sub_months(Months::new(1)),
            Tier::Year => now.checked_sub_months(Months::new(12)),
        };
        start.unwrap_or(DateTime::<Utc>::MIN_UTC)
    }

    /// Length of the window ending at `now`, in seconds.
    pub fn window_seconds(self, now: DateTime<Utc>) -> f64 {
        (now - self.window_start(now)).num_seconds() as f64
    }

    /// Samples at or before this instant have aged out of the tier.
    pub fn retention_horizon(self, now: DateTime<Utc>) -> DateTime<Utc> {
        self.window_start(now)
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_label())
    }
}

/// One value per tier, serialized as `{"hour", "day", "month", "year"}`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PerTier<T> {
    pub hour: T,
    pub day: T,
    pub month: T,
    pub year: T,
}

impl<T> Index<Tier> for PerTier<T> {
    type Output = T;

    fn index(&self, tier: Tier) -> &T {
        match tier {
            Tier::Hour => &self.hour,
            Tier::Day => &self.day,
            Tier::Month => &self.month,
            Tier::Year => &self.year,
        }
    }
}

impl<T> IndexMut<Tier> for PerTier<T> {
    fn index_mut(&mut self, tier: Tier) -> &mut T {
        match tier {
            Tier::Hour => &mut self.hour,
            Tier::Day => &mut self.day,
            Tier::Month => &mut self.month,
            Tier::Year => &mut self.year,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    Pod,
    Node,
    App,
}

impl ResourceKind {
    pub fn as_label(self) -> &'static str {
        match self {
            ResourceKind::Pod => "pod",
            ResourceKind::Node => "node",
            ResourceKind::App => "app",
        }
    }

    pub fn parse(input: &str) -> Option<Self> {
        match input.trim().to_ascii_lowercase().as_str() {
            "pod" | "pods" => Some(ResourceKind::Pod),
            "node" | "nodes" => Some(ResourceKind::Node),
            "app" | "apps" => Some(ResourceKind::App),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    pub namespace: String,
}

/// Store key of a record: what kind of resource it tracks plus its identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ResourceKey {
    pub kind: ResourceKind,
    pub identity: Identity,
}

impl ResourceKey {
    pub fn new(kind: ResourceKind, name: impl Into<String>, namespace: impl Into<String>) -> Self {
        Self {
            kind,
            identity: Identity {
                name: name.into(),
                namespace: namespace.into(),
            },
        }
    }
}

impl fmt::Display for ResourceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.identity.namespace.is_empty() {
            write!(f, "{}/{}", self.kind.as_label(), self.identity.name)
        } else {
            write!(
                f,
                "{}/{}/{}",
                self.kind.as_label(),
                self.identity.namespace,
                self.identity.name
            )
        }
    }
}

/// One raw sample for one resource, as produced by a collector.
#[derive(Debug, Clone, PartialEq)]
pub struct Observation {
    pub key: ResourceKey,
    pub sample: Sample,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(y: i32, m: u32, d: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(y, m, d, 12, 0, 0)
            .single()
            .expect("valid fixed timestamp")
    }

    #[test]
    fn hour_window_is_exactly_one_hour() {
        let now = at(2024, 3, 10);
        assert_eq!(Tier::Hour.window_seconds(now), 3600.0);
        assert_eq!((now - Tier::Hour.retention_horizon(now)).num_seconds(), 3600);
    }

    #[test]
    fn calendar_windows_follow_month_lengths() {
        assert_eq!(Tier::Month.window_seconds(at(2024, 3, 10)), 29.0 * 86_400.0);
        assert_eq!(Tier::Month.window_seconds(at(2023, 3, 10)), 28.0 * 86_400.0);
        assert_eq!(Tier::Year.window_seconds(at(2024, 3, 10)), 366.0 * 86_400.0);
        assert_eq!(Tier::Day.window_seconds(at(2024, 3, 10)), 86_400.0);
    }

    #[test]
    fn coarser_chain_ends_at_year() {
        assert_eq!(Tier::Hour.coarser(), Some(Tier::Day));
        assert_eq!(Tier::Day.coarser(), Some(Tier::Month));
        assert_eq!(Tier::Month.coarser(), Some(Tier::Year));
        assert_eq!(Tier::Year.coarser(), None);
    }

    #[test]
    fn sample_uses_wire_field_names() {
        let json = serde_json::to_value(Sample::new(1.5, 2.0, 42)).expect("serialize");
        assert_eq!(json, serde_json::json!({"actual": 1.5, "request": 2.0, "time": 42}));
    }

    #[test]
    fn resource_key_display_omits_empty_namespace() {
        assert_eq!(ResourceKey::new(ResourceKind::Node, "n1", "").to_string(), "node/n1");
        assert_eq!(
            ResourceKey::new(ResourceKind::Pod, "web", "prod").to_string(),
            "pod/prod/web"
        );
    }

    #[test]
    fn resource_kind_parse_accepts_plurals() {
        assert_eq!(ResourceKind::parse("Pods"), Some(ResourceKind::Pod));
        assert_eq!(ResourceKind::parse("node"), Some(ResourceKind::Node));
        assert_eq!(ResourceKind::parse("service"), None);
    }
}
