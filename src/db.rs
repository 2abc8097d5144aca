use crate::canonical::{CanonicalSite, SiteKey};
use crate::error::IngestError;
use crate::ingest::{IngestReport, ingest};
use crate::model::{Camera, Lane, MeasurementLocation, Publication};
use crate::normalize;
use crate::repository::{
    CameraId, Fact, FactId, LaneId, LocationId, MeasurementId, PublicationId, Repository, SiteId,
};
use chrono::{DateTime, FixedOffset, TimeZone, Utc};
use duckdb::ffi::ErrorCode;
use duckdb::{Connection, params};
use serde::Serialize;
use std::time::Instant;
use tracing::{info, instrument, warn};
use uuid::Uuid;

/// Whole-transaction attempts before a site conflict is given up on.
const MAX_ATTEMPTS: u8 = 3;

pub struct Store {
    conn: Connection,
}

impl Store {
    /// Open a database file, or an in-memory database when no url is given,
    /// and make sure the schema exists.
    pub fn open(db_url: Option<&str>, threads: u8, memory_gb: u8) -> anyhow::Result<Self> {
        info!("Prepare database {:?}", db_url);

        let conn = match db_url {
            None => Connection::open_in_memory(),
            Some(f) => Connection::open(f),
        }?;

        conn.execute_batch(
            format!(
                "set memory_limit = '{}GB'; set threads = {}",
                memory_gb,
                threads.max(1)
            )
            .as_str(),
        )?;

        let schema: &str = include_str!("schema.sql");
        conn.execute_batch(schema)?;

        Ok(Self { conn })
    }

    /// Another connection to the same database, for a concurrent worker.
    pub fn try_clone(&self) -> duckdb::Result<Self> {
        Ok(Self {
            conn: self.conn.try_clone()?,
        })
    }

    /// Run `work` in a transaction, committing when it succeeds and rolling
    /// back when it fails. A lost race on a site key reruns the whole
    /// transaction, by which time the winning site is visible and gets reused.
    pub fn in_transaction<T, F>(&mut self, mut work: F) -> Result<T, IngestError>
    where
        F: FnMut(&DuckTx<'_>) -> Result<T, IngestError>,
    {
        let mut attempt = 1;
        loop {
            match self.attempt(&mut work) {
                Err(IngestError::IdentityConflict(reason)) if attempt < MAX_ATTEMPTS => {
                    warn!("Site conflict on attempt {attempt}, retrying: {reason}");
                    attempt += 1;
                }
                Err(IngestError::IdentityConflict(last)) => {
                    return Err(IngestError::RetriesExhausted {
                        attempts: attempt,
                        last,
                    });
                }
                outcome => return outcome,
            }
        }
    }

    fn attempt<T, F>(&mut self, work: &mut F) -> Result<T, IngestError>
    where
        F: FnMut(&DuckTx<'_>) -> Result<T, IngestError>,
    {
        let tx = self.conn.transaction()?;
        // Dropping `tx` on the error path rolls back.
        let value = work(&DuckTx { conn: &tx })?;
        tx.commit().map_err(site_conflict)?;
        Ok(value)
    }

    #[instrument(name = "commit_publication", skip_all, fields(duration_ms = tracing::field::Empty))]
    pub fn ingest_publication(
        &mut self,
        publication: &Publication,
    ) -> Result<IngestReport, IngestError> {
        let start = Instant::now();
        let report = self.in_transaction(|tx| ingest(tx, publication))?;
        tracing::Span::current().record("duration_ms", start.elapsed().as_millis());
        info!(
            "Publication {} ({} {}): measurements={} sites_created={} sites_reused={}",
            report.publication,
            publication.kind,
            publication.reference_id,
            report.measurements,
            report.sites_created,
            report.sites_reused
        );
        Ok(report)
    }

    /// Normalize and ingest one XML document.
    pub fn ingest_xml(&mut self, xml: &str) -> Result<IngestReport, IngestError> {
        let publication = normalize::from_xml(xml)?;
        self.ingest_publication(&publication)
    }

    pub fn counts(&self) -> duckdb::Result<TableCounts> {
        self.conn.query_row(
            "select
               (select count(*) from publication),
               (select count(*) from measurement),
               (select count(*) from measurement_site),
               (select count(*) from measurement_location),
               (select count(*) from lane),
               (select count(*) from camera),
               (select count(*) from travel_time),
               (select count(*) from individual_travel_time),
               (select count(*) from traffic_flow),
               (select count(*) from traffic_flow_category_count)",
            [],
            |row| {
                Ok(TableCounts {
                    publications: row.get(0)?,
                    measurements: row.get(1)?,
                    measurement_sites: row.get(2)?,
                    measurement_locations: row.get(3)?,
                    lanes: row.get(4)?,
                    cameras: row.get(5)?,
                    travel_times: row.get(6)?,
                    individual_travel_times: row.get(7)?,
                    traffic_flows: row.get(8)?,
                    traffic_flow_category_counts: row.get(9)?,
                })
            },
        )
    }

    /// When the site with this key was first seen, if it is stored.
    pub fn first_publication_timestamp(
        &self,
        key: &SiteKey,
    ) -> duckdb::Result<Option<DateTime<Utc>>> {
        let millis = optional(self.conn.query_row(
            "select epoch_ms(first_publication_timestamp) from measurement_site where canonical_hash = ?",
            [key.as_str()],
            |row| row.get::<_, i64>(0),
        ))?;
        Ok(millis.and_then(|ms| Utc.timestamp_millis_opt(ms).single()))
    }
}

#[derive(Clone, Copy, PartialEq, Eq, Debug, Default, Serialize)]
pub struct TableCounts {
    pub publications: i64,
    pub measurements: i64,
    pub measurement_sites: i64,
    pub measurement_locations: i64,
    pub lanes: i64,
    pub cameras: i64,
    pub travel_times: i64,
    pub individual_travel_times: i64,
    pub traffic_flows: i64,
    pub traffic_flow_category_counts: i64,
}

/// The repository, bound to one open transaction.
pub struct DuckTx<'a> {
    conn: &'a Connection,
}

/// Failures that mean another transaction stored the same site key first.
/// Site rows are the only rows whose keys can collide: everything else gets a
/// fresh uuid.
///
/// DuckDB reports unique and not-null violations with the same code, so a
/// constraint violation counts only when it names a duplicate key. Commit
/// failures from a concurrent writer carry no specific code and are
/// recognized by their message.
fn site_conflict(err: duckdb::Error) -> IngestError {
    let conflict = match &err {
        duckdb::Error::DuckDBFailure(failure, message) => {
            let message = message.as_deref().unwrap_or_default().to_lowercase();
            let duplicate =
                message.contains("duplicate key") || message.contains("canonical_hash");
            match failure.code {
                ErrorCode::ConstraintViolation => duplicate,
                _ => duplicate || message.contains("conflict"),
            }
        }
        _ => false,
    };
    if conflict {
        IngestError::IdentityConflict(err.to_string())
    } else {
        IngestError::Persistence(err)
    }
}

fn optional<T>(result: duckdb::Result<T>) -> duckdb::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(duckdb::Error::QueryReturnedNoRows) => Ok(None),
        Err(e) => Err(e),
    }
}

fn utc(ts: &DateTime<FixedOffset>) -> String {
    ts.naive_utc().format("%Y-%m-%d %H:%M:%S%.f").to_string()
}

impl Repository for DuckTx<'_> {
    fn find_site(&self, key: &SiteKey) -> Result<Option<SiteId>, IngestError> {
        let id = optional(self.conn.query_row(
            "select id::varchar from measurement_site where canonical_hash = ?",
            [key.as_str()],
            |row| row.get::<_, String>(0),
        ))?;
        id.map(|raw| {
            Uuid::parse_str(&raw).map(SiteId::from).map_err(|e| {
                IngestError::Persistence(duckdb::Error::FromSqlConversionFailure(
                    0,
                    duckdb::types::Type::Text,
                    Box::new(e),
                ))
            })
        })
        .transpose()
    }

    fn insert_site(
        &self,
        id: SiteId,
        site: &CanonicalSite,
        first_publication_timestamp: DateTime<FixedOffset>,
    ) -> Result<bool, IngestError> {
        let fields = site.site();
        let inserted = self
            .conn
            .execute(
                "insert into measurement_site
                   (id, reference_id, version, name, type, length,
                    canonical_hash, canonical_form, first_publication_timestamp)
                 values (?, ?, ?, ?, ?, ?, ?, ?, ?)
                 on conflict (canonical_hash) do nothing",
                params![
                    id.to_string(),
                    fields.reference_id,
                    fields.version,
                    fields.name,
                    fields.kind.as_str(),
                    fields.length,
                    site.key().as_str(),
                    site.form(),
                    utc(&first_publication_timestamp),
                ],
            )
            .map_err(site_conflict)?;
        Ok(inserted == 1)
    }

    fn insert_location(
        &self,
        site: SiteId,
        location: &MeasurementLocation,
    ) -> Result<LocationId, IngestError> {
        let id = LocationId::new();
        self.conn.execute(
            "insert into measurement_location (id, measurement_site_id, \"index\") values (?, ?, ?)",
            params![id.to_string(), site.to_string(), location.index],
        )?;
        Ok(id)
    }

    fn insert_lane(&self, location: LocationId, lane: &Lane) -> Result<LaneId, IngestError> {
        let id = LaneId::new();
        self.conn.execute(
            "insert into lane (id, measurement_location_id, specific_lane) values (?, ?, ?)",
            params![id.to_string(), location.to_string(), lane.specific_lane],
        )?;
        Ok(id)
    }

    fn insert_camera(&self, lane: LaneId, camera: &Camera) -> Result<CameraId, IngestError> {
        let id = CameraId::new();
        self.conn.execute(
            "insert into camera
               (id, lane_id, reference_id, lane_number, status, view_direction, latitude, longitude)
             values (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id.to_string(),
                lane.to_string(),
                camera.reference_id,
                camera.lane_number,
                camera.status.map(|s| s.as_str()),
                camera.view_direction.0,
                camera.latitude.map(|l| l.0),
                camera.longitude.map(|l| l.0),
            ],
        )?;
        Ok(id)
    }

    fn create_publication(&self, publication: &Publication) -> Result<PublicationId, IngestError> {
        let id = PublicationId::new();
        self.conn.execute(
            "insert into publication
               (id, type, reference_id, version, publication_time,
                measurement_start_time, measurement_end_time, measurement_duration)
             values (?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                id.to_string(),
                publication.kind.as_str(),
                publication.reference_id,
                publication.version,
                utc(&publication.publication_time),
                utc(&publication.measurement_start_time),
                publication.measurement_end_time.as_ref().map(utc),
                publication.measurement_duration,
            ],
        )?;
        Ok(id)
    }

    fn create_measurement(
        &self,
        publication: PublicationId,
        site: SiteId,
    ) -> Result<MeasurementId, IngestError> {
        let id = MeasurementId::new();
        self.conn.execute(
            "insert into measurement (id, publication_id, measurement_site_id) values (?, ?, ?)",
            params![id.to_string(), publication.to_string(), site.to_string()],
        )?;
        Ok(id)
    }

    fn create_fact(
        &self,
        measurement: MeasurementId,
        fact: Fact<'_>,
    ) -> Result<FactId, IngestError> {
        let id = FactId::new();
        match fact {
            Fact::TravelTime(travel_time) => {
                self.conn.execute(
                    "insert into travel_time
                       (id, measurement_id, type, data_quality, estimation_type,
                        travel_time, traffic_speed, data_error, num_input_values_used)
                     values (?, ?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        id.to_string(),
                        measurement.to_string(),
                        travel_time.kind.as_str(),
                        travel_time.data_quality,
                        travel_time.estimation_type,
                        travel_time.travel_time,
                        travel_time.traffic_speed,
                        travel_time.data_error,
                        travel_time.num_input_values_used,
                    ],
                )?;
            }
            Fact::IndividualTravelTime(individual) => {
                self.conn.execute(
                    "insert into individual_travel_time
                       (id, measurement_id, license_plate, vehicle_category,
                        detection_start_time, detection_end_time, travel_time, traffic_speed)
                     values (?, ?, ?, ?, ?, ?, ?, ?)",
                    params![
                        id.to_string(),
                        measurement.to_string(),
                        individual.license_plate,
                        individual.vehicle_category,
                        individual.detection_start_time.as_ref().map(utc),
                        individual.detection_end_time.as_ref().map(utc),
                        individual.travel_time,
                        individual.traffic_speed,
                    ],
                )?;
            }
            Fact::TrafficFlow(flow) => {
                self.conn.execute(
                    "insert into traffic_flow (id, measurement_id, specific_lane, vehicle_flow)
                     values (?, ?, ?, ?)",
                    params![
                        id.to_string(),
                        measurement.to_string(),
                        flow.specific_lane,
                        flow.vehicle_flow,
                    ],
                )?;
                for category in &flow.categories {
                    self.conn.execute(
                        "insert into traffic_flow_category_count (id, traffic_flow_id, count, type)
                         values (?, ?, ?, ?)",
                        params![
                            Uuid::new_v4().to_string(),
                            id.to_string(),
                            category.count,
                            category.kind,
                        ],
                    )?;
                }
            }
        }
        Ok(id)
    }
}
