// Turns one normalized publication into rows.
use crate::canonical::canonicalize;
use crate::error::IngestError;
use crate::model::Publication;
use crate::repository::{Fact, PublicationId, Repository};
use crate::resolver::resolve;
use serde::{Serialize, Serializer};
use tracing::{debug, instrument};

/// What one ingestion wrote.
#[derive(Clone, PartialEq, Eq, Debug, Serialize)]
pub struct IngestReport {
    #[serde(serialize_with = "display")]
    pub publication: PublicationId,
    pub measurements: usize,
    pub sites_created: usize,
    pub sites_reused: usize,
    pub travel_times: usize,
    pub individual_travel_times: usize,
    pub traffic_flows: usize,
    pub category_counts: usize,
}

fn display<S: Serializer>(id: &PublicationId, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(id)
}

/// Write the publication, resolve each measurement's site and attach its facts.
///
/// Meant to run inside one transaction: on error the caller rolls back and
/// nothing from this publication survives. Each site is resolved before the
/// measurement referencing it is created, so facts never point at a site that
/// does not exist yet. New sites record the publication's measurement start
/// time as their first sighting.
#[instrument(
    name = "ingest_publication",
    skip_all,
    fields(kind = %publication.kind, reference = %publication.reference_id)
)]
pub fn ingest<R: Repository + ?Sized>(
    repo: &R,
    publication: &Publication,
) -> Result<IngestReport, IngestError> {
    let publication_id = repo.create_publication(publication)?;
    let mut report = IngestReport {
        publication: publication_id,
        measurements: 0,
        sites_created: 0,
        sites_reused: 0,
        travel_times: 0,
        individual_travel_times: 0,
        traffic_flows: 0,
        category_counts: 0,
    };

    for measurement in &publication.measurements {
        let site = canonicalize(measurement.site.clone())?;
        let (site_id, created) = resolve(repo, &site, publication.measurement_start_time)?;
        if created {
            report.sites_created += 1;
        } else {
            report.sites_reused += 1;
        }

        let measurement_id = repo.create_measurement(publication_id, site_id)?;
        report.measurements += 1;

        for travel_time in &measurement.travel_times {
            repo.create_fact(measurement_id, Fact::TravelTime(travel_time))?;
            report.travel_times += 1;
        }
        for individual in &measurement.individual_travel_times {
            repo.create_fact(measurement_id, Fact::IndividualTravelTime(individual))?;
            report.individual_travel_times += 1;
        }
        for flow in &measurement.traffic_flows {
            repo.create_fact(measurement_id, Fact::TrafficFlow(flow))?;
            report.traffic_flows += 1;
            report.category_counts += flow.categories.len();
        }
        debug!(
            "Measurement {measurement_id} at site {site_id} with {} facts",
            measurement.fact_count()
        );
    }

    Ok(report)
}
