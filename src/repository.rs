// The storage seam. Implementations run every call inside the transaction of
// the ingestion that issued it.
use crate::canonical::{CanonicalSite, SiteKey};
use crate::error::IngestError;
use crate::model::{
    Camera, IndividualTravelTime, Lane, MeasurementLocation, Publication, TrafficFlow, TravelTime,
};
use chrono::{DateTime, FixedOffset};
use std::fmt;
use uuid::Uuid;

macro_rules! row_id {
    ($($name:ident),+ $(,)?) => {
        $(
            #[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
            pub struct $name(Uuid);

            impl $name {
                pub fn new() -> Self {
                    Self(Uuid::new_v4())
                }
            }

            impl Default for $name {
                fn default() -> Self {
                    Self::new()
                }
            }

            impl From<Uuid> for $name {
                fn from(id: Uuid) -> Self {
                    Self(id)
                }
            }

            impl fmt::Display for $name {
                fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                    self.0.fmt(f)
                }
            }
        )+
    };
}

row_id!(
    PublicationId,
    SiteId,
    LocationId,
    LaneId,
    CameraId,
    MeasurementId,
    FactId,
);

/// A measured fact attached to one measurement.
#[derive(Clone, Copy, Debug)]
pub enum Fact<'a> {
    TravelTime(&'a TravelTime),
    IndividualTravelTime(&'a IndividualTravelTime),
    /// Created together with its category counts.
    TrafficFlow(&'a TrafficFlow),
}

pub trait Repository {
    fn find_site(&self, key: &SiteKey) -> Result<Option<SiteId>, IngestError>;

    /// Insert the site row alone. `Ok(false)` means a site with the same key
    /// already exists and nothing was written.
    fn insert_site(
        &self,
        id: SiteId,
        site: &CanonicalSite,
        first_publication_timestamp: DateTime<FixedOffset>,
    ) -> Result<bool, IngestError>;

    fn insert_location(
        &self,
        site: SiteId,
        location: &MeasurementLocation,
    ) -> Result<LocationId, IngestError>;

    fn insert_lane(&self, location: LocationId, lane: &Lane) -> Result<LaneId, IngestError>;

    fn insert_camera(&self, lane: LaneId, camera: &Camera) -> Result<CameraId, IngestError>;

    /// Insert the publication envelope; measurements are added separately.
    fn create_publication(&self, publication: &Publication) -> Result<PublicationId, IngestError>;

    fn create_measurement(
        &self,
        publication: PublicationId,
        site: SiteId,
    ) -> Result<MeasurementId, IngestError>;

    fn create_fact(&self, measurement: MeasurementId, fact: Fact<'_>)
    -> Result<FactId, IngestError>;
}
