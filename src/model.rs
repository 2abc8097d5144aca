// Typed shape of one publication after normalization. These mirror the
// delivered XML closely; anything derived (canonical form, ids) lives
// elsewhere.
use chrono::{DateTime, FixedOffset};
use ordered_float::OrderedFloat;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Implements `FromStr`/`as_str` for a closed set of wire tokens.
macro_rules! wire_enum {
    ($name:ident { $($variant:ident => $token:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($name::$variant => $token),+
                }
            }
        }

        impl FromStr for $name {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($token => Ok($name::$variant),)+
                    other => Err(format!(
                        "expected one of {}, got {other:?}",
                        [$($token),+].join(", ")
                    )),
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
pub enum PublicationType {
    TrafficFlow,
    TravelTime,
    IndividualTravelTime,
}

wire_enum!(PublicationType {
    TrafficFlow => "TrafficFlow",
    TravelTime => "TravelTime",
    IndividualTravelTime => "IndividualTravelTime",
});

/// Location: a point in the road network, one or more camera-lane pairs.
/// Section: a route between two locations. Trajectory: a route made of one or
/// more sections.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SiteType {
    Location,
    Section,
    Trajectory,
}

wire_enum!(SiteType {
    Location => "location",
    Section => "section",
    Trajectory => "trajectory",
});

/// On: active and functioning. Off: not active for the travel-time system.
/// Outage: active but malfunctioning.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum CameraStatus {
    On,
    Off,
    Outage,
}

wire_enum!(CameraStatus {
    On => "on",
    Off => "off",
    Outage => "outage",
});

#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TravelTimeType {
    Raw,
    Representative,
    Processed,
    Predicted,
    Actual,
}

wire_enum!(TravelTimeType {
    Raw => "raw",
    Representative => "representative",
    Processed => "processed",
    Predicted => "predicted",
    Actual => "actual",
});

/// One delivered document.
#[derive(Clone, PartialEq, Debug)]
pub struct Publication {
    pub kind: PublicationType,
    /// Unique per data set and unchanged for the lifetime of the sending system
    pub reference_id: String,
    /// Incremented whenever sections or trajectories are added, removed or changed
    pub version: String,
    pub publication_time: DateTime<FixedOffset>,
    /// Start of the period the figures were reported against
    pub measurement_start_time: DateTime<FixedOffset>,
    pub measurement_end_time: Option<DateTime<FixedOffset>>,
    /// Length of the reporting period in seconds
    pub measurement_duration: Option<i64>,
    pub measurements: Vec<SiteMeasurement>,
}

/// One `siteMeasurements` entry: a site and whatever was measured there.
#[derive(Clone, PartialEq, Debug)]
pub struct SiteMeasurement {
    pub site: MeasurementSite,
    pub travel_times: Vec<TravelTime>,
    pub individual_travel_times: Vec<IndividualTravelTime>,
    pub traffic_flows: Vec<TrafficFlow>,
}

// Field order in the site structs is the serialization order of the canonical
// form. Reordering fields changes every site key.

#[derive(Clone, PartialEq, Eq, Hash, Debug, Serialize)]
pub struct MeasurementSite {
    pub reference_id: String,
    pub version: String,
    pub name: Option<String>,
    #[serde(rename = "type")]
    pub kind: SiteType,
    /// Meters; only sections and trajectories have one
    pub length: Option<i32>,
    pub locations: Vec<MeasurementLocation>,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct MeasurementLocation {
    /// Position within a section or trajectory; absent on location sites
    pub index: Option<i32>,
    pub lanes: Vec<Lane>,
}

#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct Lane {
    /// lane1, lane2, ... The physical lane is `Camera::lane_number`.
    pub specific_lane: String,
    pub cameras: Vec<Camera>,
}

/// Derived ordering compares fields top to bottom, as it does for `Lane` and
/// `MeasurementLocation`. It exists to sort a site deterministically and
/// carries no meaning beyond that.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize)]
pub struct Camera {
    pub reference_id: String,
    /// Counted from the middle of the road. Positive: traffic moves away from
    /// the camera. Negative: traffic moves towards it.
    pub lane_number: i32,
    pub status: Option<CameraStatus>,
    /// Degrees, 0 is north, in steps of 22.5
    pub view_direction: OrderedFloat<f64>,
    pub latitude: Option<OrderedFloat<f64>>,
    pub longitude: Option<OrderedFloat<f64>>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct TravelTime {
    pub kind: TravelTimeType,
    /// 0..=100
    pub data_quality: Option<f64>,
    pub estimation_type: Option<String>,
    /// Seconds
    pub travel_time: i32,
    /// km/h
    pub traffic_speed: i32,
    pub data_error: Option<bool>,
    pub num_input_values_used: Option<i32>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct IndividualTravelTime {
    pub license_plate: String,
    pub vehicle_category: String,
    pub detection_start_time: Option<DateTime<FixedOffset>>,
    pub detection_end_time: Option<DateTime<FixedOffset>>,
    pub travel_time: i32,
    pub traffic_speed: i32,
}

#[derive(Clone, PartialEq, Debug)]
pub struct TrafficFlow {
    pub specific_lane: String,
    /// Vehicle detections in the measurement period
    pub vehicle_flow: i32,
    pub categories: Vec<CategoryCount>,
}

#[derive(Clone, PartialEq, Debug)]
pub struct CategoryCount {
    pub count: i32,
    pub kind: Option<String>,
}

impl SiteMeasurement {
    pub fn fact_count(&self) -> usize {
        self.travel_times.len() + self.individual_travel_times.len() + self.traffic_flows.len()
    }
}
