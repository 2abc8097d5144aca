// Schema-driven conversion of the element tree into a typed `Publication`.
use crate::error::IngestError;
use crate::model::{
    Camera, CategoryCount, IndividualTravelTime, Lane, MeasurementLocation, MeasurementSite,
    Publication, SiteMeasurement, TrafficFlow, TravelTime,
};
use crate::xml::{self, Element};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use ordered_float::OrderedFloat;
use std::fmt::Display;
use std::str::FromStr;
use tracing::{debug, instrument};

const ROOT: &str = "amsterdam_travel_times";

/// Parse and normalize one document.
#[instrument(name = "normalize", skip_all, fields(bytes = xml.len()))]
pub fn from_xml(xml: &str) -> Result<Publication, IngestError> {
    let root = xml::parse_document(xml)?;
    let publication = publication(&root)?;
    debug!(
        "Normalized {} publication {} with {} measurements",
        publication.kind,
        publication.reference_id,
        publication.measurements.len()
    );
    Ok(publication)
}

pub fn publication(root: &Element) -> Result<Publication, IngestError> {
    if root.name() != ROOT {
        return Err(IngestError::SchemaMismatch(format!(
            "expected root <{ROOT}>, got <{}>",
            root.name()
        )));
    }
    let payload = required(root, "payload_publication")?;
    let reference = required(payload, "publication_reference")?;
    let period = required(payload, "measurement_period")?;

    let measurements = payload
        .children("site_measurements")
        .iter()
        .map(site_measurement)
        .collect::<Result<Vec<_>, _>>()?;

    Ok(Publication {
        kind: convert("type", required_attribute(payload, "type")?)?,
        reference_id: required_attribute(reference, "id")?.to_string(),
        version: required_attribute(reference, "version")?.to_string(),
        publication_time: timestamp("publication_time", required_text(payload, "publication_time")?)?,
        measurement_start_time: timestamp(
            "measurement_start_time",
            required_text(period, "measurement_start_time")?,
        )?,
        measurement_end_time: optional_text(period, "measurement_end_time")
            .map(|raw| timestamp("measurement_end_time", raw))
            .transpose()?,
        measurement_duration: optional_text(period, "duration")
            .map(|raw| convert("duration", raw))
            .transpose()?,
        measurements,
    })
}

fn site_measurement(src: &Element) -> Result<SiteMeasurement, IngestError> {
    let site_ref = required(src, "measurement_site_reference")?;
    let traffic_flows = match src.child("traffic_flow_data") {
        Some(data) => data
            .children("measured_flow")
            .iter()
            .map(traffic_flow)
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    Ok(SiteMeasurement {
        site: measurement_site(site_ref)?,
        travel_times: src
            .children("travel_time_data")
            .iter()
            .map(travel_time)
            .collect::<Result<_, _>>()?,
        individual_travel_times: src
            .children("individual_travel_time_data")
            .iter()
            .map(individual_travel_time)
            .collect::<Result<_, _>>()?,
        traffic_flows,
    })
}

fn measurement_site(site_ref: &Element) -> Result<MeasurementSite, IngestError> {
    // A location site carries one `location`; sections and trajectories wrap
    // theirs in an itinerary.
    let location_elements = match site_ref.child("location_contained_in_itinerary") {
        Some(itinerary) => itinerary.children("location"),
        None => site_ref.children("location"),
    };
    Ok(MeasurementSite {
        reference_id: required_attribute(site_ref, "id")?.to_string(),
        version: required_attribute(site_ref, "version")?.to_string(),
        name: optional_text(site_ref, "measurement_site_name").map(str::to_string),
        kind: convert(
            "measurement_site_type",
            required_text(site_ref, "measurement_site_type")?,
        )?,
        length: optional_text(site_ref, "length")
            .map(|raw| convert("length", raw))
            .transpose()?,
        locations: location_elements
            .iter()
            .map(location)
            .collect::<Result<_, _>>()?,
    })
}

fn location(src: &Element) -> Result<MeasurementLocation, IngestError> {
    Ok(MeasurementLocation {
        index: src
            .attribute("index")
            .map(|raw| convert("index", raw))
            .transpose()?,
        lanes: src.children("lane").iter().map(lane).collect::<Result<_, _>>()?,
    })
}

fn lane(src: &Element) -> Result<Lane, IngestError> {
    Ok(Lane {
        specific_lane: required_attribute(src, "specific_lane")?.to_string(),
        cameras: src
            .children("camera")
            .iter()
            .map(camera)
            .collect::<Result<_, _>>()?,
    })
}

fn camera(src: &Element) -> Result<Camera, IngestError> {
    let coordinates = src.child("coordinates");
    let coordinate = |name: &str| -> Result<Option<OrderedFloat<f64>>, IngestError> {
        coordinates
            .and_then(|c| c.attribute(name))
            .map(|raw| convert::<f64>(name, raw).map(unsigned_zero))
            .transpose()
    };
    let raw_direction = required_text(src, "view_direction")?;
    let view_direction: f64 = convert("view_direction", raw_direction)?;
    if view_direction % 22.5 != 0.0 {
        return Err(IngestError::conversion(
            "view_direction",
            raw_direction,
            "not a multiple of 22.5 degrees",
        ));
    }
    Ok(Camera {
        reference_id: required_attribute(src, "id")?.to_string(),
        lane_number: convert("lane_number", required_text(src, "lane_number")?)?,
        status: optional_text(src, "status")
            .map(|raw| convert("status", raw))
            .transpose()?,
        view_direction: unsigned_zero(view_direction),
        latitude: coordinate("latitude")?,
        longitude: coordinate("longitude")?,
    })
}

/// `-0` and `0` are the same reading and must give the same site key.
fn unsigned_zero(value: f64) -> OrderedFloat<f64> {
    OrderedFloat(if value == 0.0 { 0.0 } else { value })
}

fn travel_time(src: &Element) -> Result<TravelTime, IngestError> {
    let data_quality = src
        .attribute("data_quality")
        .map(|raw| -> Result<f64, IngestError> {
            let quality: f64 = convert("data_quality", raw)?;
            if (0.0..=100.0).contains(&quality) {
                Ok(quality)
            } else {
                Err(IngestError::conversion("data_quality", raw, "outside 0..=100"))
            }
        })
        .transpose()?;
    Ok(TravelTime {
        kind: convert("travel_time_type", required_attribute(src, "travel_time_type")?)?,
        data_quality,
        estimation_type: src.attribute("estimation_type").map(str::to_string),
        travel_time: convert("travel_time", required_text(src, "travel_time")?)?,
        traffic_speed: convert("traffic_speed", required_text(src, "traffic_speed")?)?,
        data_error: optional_text(src, "data_error")
            .map(|raw| truthy("data_error", raw))
            .transpose()?,
        num_input_values_used: src
            .attribute("number_of_input_values_used")
            .map(|raw| convert("number_of_input_values_used", raw))
            .transpose()?,
    })
}

fn individual_travel_time(src: &Element) -> Result<IndividualTravelTime, IngestError> {
    // The feed says startDetectionTime/endDetectionTime; the rest of the
    // model names them detection_start_time/detection_end_time.
    let detection = |delivered: &str, canonical: &str| {
        optional_text(src, delivered)
            .or_else(|| optional_text(src, canonical))
            .map(|raw| timestamp(canonical, raw))
            .transpose()
    };
    Ok(IndividualTravelTime {
        license_plate: required_text(src, "license_plate")?.to_string(),
        vehicle_category: required_text(src, "vehicle_category")?.to_string(),
        detection_start_time: detection("start_detection_time", "detection_start_time")?,
        detection_end_time: detection("end_detection_time", "detection_end_time")?,
        travel_time: convert("travel_time", required_text(src, "travel_time")?)?,
        traffic_speed: convert("traffic_speed", required_text(src, "traffic_speed")?)?,
    })
}

fn traffic_flow(src: &Element) -> Result<TrafficFlow, IngestError> {
    let categories = match src.child("number_of_input_values_used") {
        Some(counts) => counts
            .children("category")
            .iter()
            .map(|category| -> Result<CategoryCount, IngestError> {
                Ok(CategoryCount {
                    count: convert("count", required_attribute(category, "count")?)?,
                    kind: category
                        .attribute("type")
                        .filter(|kind| !kind.is_empty())
                        .map(str::to_string),
                })
            })
            .collect::<Result<_, _>>()?,
        None => Vec::new(),
    };
    Ok(TrafficFlow {
        specific_lane: required_attribute(src, "specific_lane")?.to_string(),
        vehicle_flow: convert("vehicle_flow", required_text(src, "vehicle_flow")?)?,
        categories,
    })
}

/// Conventional truthy-string parsing: y/yes/t/true/on/1 and n/no/f/false/off/0,
/// case-insensitive.
pub fn truthy(field: &str, raw: &str) -> Result<bool, IngestError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "y" | "yes" | "t" | "true" | "on" | "1" => Ok(true),
        "n" | "no" | "f" | "false" | "off" | "0" => Ok(false),
        _ => Err(IngestError::conversion(field, raw, "not a boolean")),
    }
}

/// RFC 3339, or an offset-less timestamp taken as UTC.
fn timestamp(field: &str, raw: &str) -> Result<DateTime<FixedOffset>, IngestError> {
    DateTime::parse_from_rfc3339(raw)
        .or_else(|_| {
            NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                .map(|naive| naive.and_utc().fixed_offset())
        })
        .map_err(|e| IngestError::conversion(field, raw, e))
}

fn convert<T>(field: &str, raw: &str) -> Result<T, IngestError>
where
    T: FromStr,
    T::Err: Display,
{
    raw.trim()
        .parse()
        .map_err(|e| IngestError::conversion(field, raw, e))
}

fn required<'a>(src: &'a Element, name: &str) -> Result<&'a Element, IngestError> {
    src.child(name).ok_or_else(|| {
        IngestError::SchemaMismatch(format!("<{}> has no <{name}>", src.name()))
    })
}

fn required_text<'a>(src: &'a Element, name: &str) -> Result<&'a str, IngestError> {
    required(src, name).map(Element::text)
}

fn required_attribute<'a>(src: &'a Element, name: &str) -> Result<&'a str, IngestError> {
    src.attribute(name).ok_or_else(|| {
        IngestError::SchemaMismatch(format!("<{}> has no {name} attribute", src.name()))
    })
}

/// Text of an optional child; an empty element counts as absent.
fn optional_text<'a>(src: &'a Element, name: &str) -> Option<&'a str> {
    src.child_text(name).filter(|text| !text.is_empty())
}
