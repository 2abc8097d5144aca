use chrono::{TimeZone, Utc};
use reistijden::canonical::{CanonicalSite, SiteKey, canonicalize};
use reistijden::db::DuckTx;
use reistijden::ingest::ingest;
use reistijden::model::{Camera, Lane, MeasurementLocation, Publication};
use reistijden::normalize;
use reistijden::repository::{
    CameraId, Fact, FactId, LaneId, LocationId, MeasurementId, PublicationId, Repository, SiteId,
};
use reistijden::{ErrorKind, IngestError, Store, TableCounts};
use rstest::rstest;
use std::cell::Cell;
use std::sync::Barrier;

const TRAVEL_TIME: &str = include_str!("fixtures/travel_time.xml");
const INDIVIDUAL_TRAVEL_TIME: &str = include_str!("fixtures/individual_travel_time.xml");
const TRAFFIC_FLOW: &str = include_str!("fixtures/traffic_flow.xml");

fn store() -> Store {
    Store::open(None, 1, 1).unwrap()
}

fn site_key(xml: &str) -> SiteKey {
    let publication = normalize::from_xml(xml).unwrap();
    canonicalize(publication.measurements[0].site.clone())
        .unwrap()
        .key()
        .clone()
}

#[test]
fn identical_sites_in_one_publication_are_stored_once() {
    let mut store = store();
    let report = store.ingest_xml(TRAVEL_TIME).unwrap();
    assert_eq!(report.measurements, 2);
    assert_eq!(report.sites_created, 1);
    assert_eq!(report.sites_reused, 1);
    assert_eq!(report.travel_times, 2);

    assert_eq!(
        store.counts().unwrap(),
        TableCounts {
            publications: 1,
            measurements: 2,
            measurement_sites: 1,
            measurement_locations: 3,
            lanes: 4,
            cameras: 5,
            travel_times: 2,
            ..Default::default()
        }
    );
}

#[test]
fn individual_travel_times_attach_to_their_sections() {
    let mut store = store();
    let report = store.ingest_xml(INDIVIDUAL_TRAVEL_TIME).unwrap();
    assert_eq!(report.sites_created, 2);
    assert_eq!(report.individual_travel_times, 5);

    let counts = store.counts().unwrap();
    assert_eq!(counts.measurement_sites, 2);
    assert_eq!(counts.measurement_locations, 4);
    assert_eq!(counts.cameras, 4);
    assert_eq!(counts.individual_travel_times, 5);
    assert_eq!(counts.travel_times, 0);
}

#[test]
fn traffic_flows_keep_their_category_counts() {
    let mut store = store();
    let report = store.ingest_xml(TRAFFIC_FLOW).unwrap();
    assert_eq!(report.traffic_flows, 3);
    assert_eq!(report.category_counts, 6);

    let counts = store.counts().unwrap();
    assert_eq!(counts.measurement_sites, 3);
    assert_eq!(counts.measurement_locations, 3);
    assert_eq!(counts.traffic_flows, 3);
    assert_eq!(counts.traffic_flow_category_counts, 6);
}

#[test]
fn later_publications_reuse_the_site_and_keep_its_first_sighting() {
    let mut store = store();
    store.ingest_xml(TRAVEL_TIME).unwrap();

    let later = TRAVEL_TIME
        .replace("2020-07-29T13:57:00Z", "2020-07-29T14:02:00Z")
        .replace("2020-07-29T13:58:00Z", "2020-07-29T14:03:00Z");
    let report = store.ingest_xml(&later).unwrap();
    assert_eq!(report.sites_created, 0);
    assert_eq!(report.sites_reused, 2);

    let counts = store.counts().unwrap();
    assert_eq!(counts.publications, 2);
    assert_eq!(counts.measurements, 4);
    assert_eq!(counts.measurement_sites, 1);
    assert_eq!(counts.cameras, 5);

    let first_seen = store
        .first_publication_timestamp(&site_key(TRAVEL_TIME))
        .unwrap();
    assert_eq!(
        first_seen,
        Some(Utc.with_ymd_and_hms(2020, 7, 29, 13, 57, 0).unwrap())
    );
}

#[test]
fn a_changed_camera_makes_a_new_site() {
    let mut store = store();
    store.ingest_xml(TRAVEL_TIME).unwrap();

    let turned = TRAVEL_TIME.replace(
        "<viewDirection>157.5</viewDirection>",
        "<viewDirection>180</viewDirection>",
    );
    assert_ne!(site_key(TRAVEL_TIME), site_key(&turned));
    let report = store.ingest_xml(&turned).unwrap();
    assert_eq!(report.sites_created, 1);

    let counts = store.counts().unwrap();
    assert_eq!(counts.measurement_sites, 2);
    assert_eq!(counts.cameras, 10);
}

#[rstest]
#[case::not_xml("this is not xml".to_string(), ErrorKind::MalformedInput)]
#[case::truncated(TRAVEL_TIME[..TRAVEL_TIME.len() / 2].to_string(), ErrorKind::MalformedInput)]
#[case::wrong_root("<rss><channel/></rss>".to_string(), ErrorKind::SchemaMismatch)]
#[case::bad_flag(
    TRAVEL_TIME.replace("<dataError>false</dataError>", "<dataError>maybe</dataError>"),
    ErrorKind::FieldConversion
)]
#[case::bad_direction(
    TRAVEL_TIME.replace("<viewDirection>135</viewDirection>", "<viewDirection>130</viewDirection>"),
    ErrorKind::FieldConversion
)]
fn rejected_documents_leave_nothing_behind(#[case] xml: String, #[case] kind: ErrorKind) {
    let mut store = store();
    let err = store.ingest_xml(&xml).unwrap_err();
    assert_eq!(err.kind(), kind, "{err}");
    assert_eq!(store.counts().unwrap(), TableCounts::default());
}

/// Delegates to the real transaction and fails the first fact of the third
/// measurement.
struct FailOnThirdMeasurement<'a> {
    inner: &'a DuckTx<'a>,
    measurements: Cell<usize>,
}

impl Repository for FailOnThirdMeasurement<'_> {
    fn find_site(&self, key: &SiteKey) -> Result<Option<SiteId>, IngestError> {
        self.inner.find_site(key)
    }

    fn insert_site(
        &self,
        id: SiteId,
        site: &CanonicalSite,
        first: chrono::DateTime<chrono::FixedOffset>,
    ) -> Result<bool, IngestError> {
        self.inner.insert_site(id, site, first)
    }

    fn insert_location(
        &self,
        site: SiteId,
        location: &MeasurementLocation,
    ) -> Result<LocationId, IngestError> {
        self.inner.insert_location(site, location)
    }

    fn insert_lane(&self, location: LocationId, lane: &Lane) -> Result<LaneId, IngestError> {
        self.inner.insert_lane(location, lane)
    }

    fn insert_camera(&self, lane: LaneId, camera: &Camera) -> Result<CameraId, IngestError> {
        self.inner.insert_camera(lane, camera)
    }

    fn create_publication(&self, publication: &Publication) -> Result<PublicationId, IngestError> {
        self.inner.create_publication(publication)
    }

    fn create_measurement(
        &self,
        publication: PublicationId,
        site: SiteId,
    ) -> Result<MeasurementId, IngestError> {
        self.measurements.set(self.measurements.get() + 1);
        self.inner.create_measurement(publication, site)
    }

    fn create_fact(&self, measurement: MeasurementId, fact: Fact<'_>) -> Result<FactId, IngestError> {
        if self.measurements.get() == 3 {
            return Err(IngestError::Persistence(duckdb::Error::QueryReturnedNoRows));
        }
        self.inner.create_fact(measurement, fact)
    }
}

#[test]
fn a_failure_midway_rolls_back_the_whole_publication() {
    let mut store = store();
    let mut publication = normalize::from_xml(TRAVEL_TIME).unwrap();
    let again = publication.measurements.clone();
    publication.measurements.extend(again);
    assert_eq!(publication.measurements.len(), 4);

    let err = store
        .in_transaction(|tx| {
            let failing = FailOnThirdMeasurement {
                inner: tx,
                measurements: Cell::new(0),
            };
            ingest(&failing, &publication)
        })
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Persistence);
    assert_eq!(store.counts().unwrap(), TableCounts::default());

    // The same publication goes through untouched afterwards.
    let report = store.ingest_publication(&publication).unwrap();
    assert_eq!(report.measurements, 4);
    assert_eq!(store.counts().unwrap().measurement_sites, 1);
}

#[test]
fn concurrent_writers_agree_on_one_site() {
    let store = store();
    let barrier = Barrier::new(2);
    let reports = std::thread::scope(|scope| {
        let workers: Vec<_> = (0..2)
            .map(|_| {
                let mut store = store.try_clone().unwrap();
                let barrier = &barrier;
                scope.spawn(move || {
                    barrier.wait();
                    store.ingest_xml(TRAVEL_TIME)
                })
            })
            .collect();
        workers
            .into_iter()
            .map(|worker| worker.join().unwrap())
            .collect::<Vec<_>>()
    });

    for report in &reports {
        assert!(report.is_ok(), "{report:?}");
    }
    let counts = store.counts().unwrap();
    assert_eq!(counts.publications, 2);
    assert_eq!(counts.measurements, 4);
    assert_eq!(counts.measurement_sites, 1);
    assert_eq!(counts.cameras, 5);
}

#[test]
fn sites_survive_reopening_the_database() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("reistijden.db");
    let path = path.to_str().unwrap();

    Store::open(Some(path), 1, 1)
        .unwrap()
        .ingest_xml(TRAVEL_TIME)
        .unwrap();

    let mut reopened = Store::open(Some(path), 1, 1).unwrap();
    let report = reopened.ingest_xml(TRAVEL_TIME).unwrap();
    assert_eq!(report.sites_created, 0);

    let counts = reopened.counts().unwrap();
    assert_eq!(counts.publications, 2);
    assert_eq!(counts.measurement_sites, 1);
}
