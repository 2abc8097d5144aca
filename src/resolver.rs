// Find-or-create for measurement sites.
use crate::canonical::CanonicalSite;
use crate::error::IngestError;
use crate::model::{Lane, MeasurementLocation, MeasurementSite};
use crate::repository::{LocationId, Repository, SiteId};
use chrono::{DateTime, FixedOffset};
use tracing::{debug, instrument};

/// Return the site stored under this canonical key, creating it and its whole
/// location/lane/camera graph when it is new. The flag is true when created.
///
/// An existing site is returned as is: its first publication timestamp and
/// its children are never touched. When the site insert reports that another
/// writer got there first, the winner's row is used instead. If that row is
/// not visible yet, `IdentityConflict` asks the caller to retry the
/// transaction.
#[instrument(
    name = "resolve_site",
    skip_all,
    fields(site = %site.site().reference_id, key = %site.key())
)]
pub fn resolve<R: Repository + ?Sized>(
    repo: &R,
    site: &CanonicalSite,
    first_seen: DateTime<FixedOffset>,
) -> Result<(SiteId, bool), IngestError> {
    if let Some(existing) = repo.find_site(site.key())? {
        return Ok((existing, false));
    }

    let id = SiteId::new();
    if !repo.insert_site(id, site, first_seen)? {
        return match repo.find_site(site.key())? {
            Some(existing) => {
                debug!("Lost the race for site {existing}, reusing it");
                Ok((existing, false))
            }
            None => Err(IngestError::IdentityConflict(site.key().to_string())),
        };
    }
    build_site(repo, id, site.site())?;
    debug!("Created site {id}");
    Ok((id, true))
}

fn build_site<R: Repository + ?Sized>(
    repo: &R,
    id: SiteId,
    site: &MeasurementSite,
) -> Result<(), IngestError> {
    for location in &site.locations {
        build_location(repo, id, location)?;
    }
    Ok(())
}

fn build_location<R: Repository + ?Sized>(
    repo: &R,
    site: SiteId,
    location: &MeasurementLocation,
) -> Result<(), IngestError> {
    let id = repo.insert_location(site, location)?;
    for lane in &location.lanes {
        build_lane(repo, id, lane)?;
    }
    Ok(())
}

fn build_lane<R: Repository + ?Sized>(
    repo: &R,
    location: LocationId,
    lane: &Lane,
) -> Result<(), IngestError> {
    let id = repo.insert_lane(location, lane)?;
    for camera in &lane.cameras {
        repo.insert_camera(id, camera)?;
    }
    Ok(())
}
