//! Longitudinal (within-subject) registration chains.

use super::blur::mincblur;
use super::registration::{minctracc, MinctraccConf};
use crate::artifacts::{ArtifactStore, BlurQuery};
use crate::core::{pairs, Fwhm, XfmHandle};
use crate::errors::StageGraphError;
use crate::stages::{BuildResult, Stages};
use std::collections::BTreeMap;
use tracing::info;

/// One subject scanned at several time points.
#[derive(Debug, Clone)]
pub struct Subject {
    id: String,
    intersubject_time_point: i32,
    time_points: BTreeMap<i32, ArtifactStore>,
}

impl Subject {
    /// Creates a subject.
    ///
    /// `intersubject_time_point` selects the scan used for registration
    /// between subjects; `None` picks the latest time point.
    ///
    /// # Errors
    ///
    /// `InvalidInput` if there are no scans or the chosen time point has none.
    pub fn new(
        id: impl Into<String>,
        time_points: BTreeMap<i32, ArtifactStore>,
        intersubject_time_point: Option<i32>,
    ) -> Result<Self, StageGraphError> {
        let id = id.into();
        let Some(&latest) = time_points.keys().next_back() else {
            return Err(StageGraphError::invalid_input(
                "time_points",
                format!("subject '{id}' has no scans"),
            ));
        };
        let intersubject_time_point = intersubject_time_point.unwrap_or(latest);
        if !time_points.contains_key(&intersubject_time_point) {
            return Err(StageGraphError::invalid_input(
                "intersubject_time_point",
                format!("subject '{id}' has no scan at time point {intersubject_time_point}"),
            ));
        }
        Ok(Self {
            id,
            intersubject_time_point,
            time_points,
        })
    }

    /// Subject identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Time point used for registration between subjects.
    #[must_use]
    pub const fn intersubject_time_point(&self) -> i32 {
        self.intersubject_time_point
    }

    /// Scans by time point.
    #[must_use]
    pub const fn time_points(&self) -> &BTreeMap<i32, ArtifactStore> {
        &self.time_points
    }

    /// Store of the scan used for registration between subjects.
    #[must_use]
    pub fn intersubject_store(&self) -> &ArtifactStore {
        &self.time_points[&self.intersubject_time_point]
    }
}

/// Registers each time point of `subject` to the next one.
///
/// Every scan is blurred at `fwhm` first; the registrations use that blur
/// regardless of `conf.blur`. Handles are returned in time order. A subject
/// with a single scan needs no stages.
///
/// # Errors
///
/// Any error of [`mincblur`] or [`minctracc`].
pub fn intrasubject_registrations(
    subject: &mut Subject,
    fwhm: Fwhm,
    conf: &MinctraccConf,
) -> Result<BuildResult<Vec<XfmHandle>>, StageGraphError> {
    if subject.time_points.len() < 2 {
        return Ok(BuildResult::pure(Vec::new()));
    }
    let conf = MinctraccConf {
        blur: BlurQuery::Specific(fwhm),
        ..conf.clone()
    };

    let mut stages = Stages::new();
    for store in subject.time_points.values_mut() {
        stages.defer(mincblur(store, fwhm, conf.use_gradient))?;
    }

    let times: Vec<i32> = subject.time_points.keys().copied().collect();
    let mut handles = Vec::with_capacity(times.len() - 1);
    for (earlier, later) in pairs(&times) {
        // the source is taken out so the target can be borrowed alongside it
        let Some(mut source) = subject.time_points.remove(&earlier) else {
            continue;
        };
        let built = minctracc(&mut source, &subject.time_points[&later], &conf, None);
        subject.time_points.insert(earlier, source);
        handles.push(stages.defer(built)?);
    }

    info!(subject = %subject.id, registrations = handles.len(), stages = stages.len(), "Built registration chain");
    Ok(stages.into_result(handles))
}
