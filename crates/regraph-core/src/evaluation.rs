//! Registration quality evaluators.
//!
//! An evaluator turns one registration output (a problem at a resolution,
//! optionally restricted to a mask) into a single metric value. The data the
//! metrics need (volumes, centroids) comes from source traits implemented by
//! the image I/O layer.

use crate::edge_list::EdgeList;
use crate::graph::FrameId;
use crate::problem::{RegistrationProblem, Resolution};
use crate::{EvaluationError, GraphError};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::Path;
use std::sync::Arc;

/// What an evaluator is asked to score.
#[derive(Debug, Clone, Copy)]
pub struct EvaluationTarget<'a> {
    pub problem: RegistrationProblem,
    pub resolution: Resolution,
    pub mask: Option<&'a Path>,
}

/// Scores one registration output.
pub trait RegistrationEvaluator: Send + Sync {
    /// Metric name used as the key in quality reports.
    fn metric(&self) -> &str;

    /// Whether larger values mean a better registration.
    fn higher_is_better(&self) -> bool {
        false
    }

    fn evaluate(&self, target: &EvaluationTarget<'_>) -> Result<f64, EvaluationError>;
}

/// Voxel data for similarity metrics. Volumes are flattened in any fixed
/// order, as long as fixed, registered and mask volumes agree.
pub trait VolumeSource: Send + Sync {
    fn fixed_volume(&self, problem: &RegistrationProblem) -> Result<Vec<f32>, EvaluationError>;

    /// The moving frame resampled into the fixed frame by the registration.
    fn registered_volume(
        &self,
        problem: &RegistrationProblem,
        resolution: &Resolution,
    ) -> Result<Vec<f32>, EvaluationError>;

    fn mask_volume(&self, mask: &Path, frame: FrameId) -> Result<Vec<bool>, EvaluationError>;
}

/// Object centroids for centroid-matching metrics.
pub trait CentroidSource: Send + Sync {
    fn fixed_centroids(
        &self,
        problem: &RegistrationProblem,
    ) -> Result<Vec<[f64; 3]>, EvaluationError>;

    /// Moving-frame centroids mapped into the fixed frame by the registration.
    fn registered_centroids(
        &self,
        problem: &RegistrationProblem,
        resolution: &Resolution,
    ) -> Result<Vec<[f64; 3]>, EvaluationError>;
}

/// Normalized cross-correlation of two equally-sized volumes.
///
/// Voxels where `mask` is false are ignored. Returns a value in `[-1, 1]`;
/// constant volumes have no defined correlation.
pub fn calculate_ncc(
    fixed: &[f32],
    moving: &[f32],
    mask: Option<&[bool]>,
) -> Result<f64, EvaluationError> {
    if fixed.len() != moving.len() {
        return Err(EvaluationError::ShapeMismatch {
            fixed: fixed.len(),
            moving: moving.len(),
        });
    }
    if let Some(m) = mask {
        if m.len() != fixed.len() {
            return Err(EvaluationError::ShapeMismatch {
                fixed: fixed.len(),
                moving: m.len(),
            });
        }
    }
    let selected = |i: usize| mask.map_or(true, |m| m[i]);

    let (mut n, mut sum_f, mut sum_m) = (0usize, 0.0f64, 0.0f64);
    for i in (0..fixed.len()).filter(|&i| selected(i)) {
        n += 1;
        sum_f += fixed[i] as f64;
        sum_m += moving[i] as f64;
    }
    if n == 0 {
        return Err(EvaluationError::Undefined("mask selects no voxels".into()));
    }
    let (mean_f, mean_m) = (sum_f / n as f64, sum_m / n as f64);

    let (mut cov, mut var_f, mut var_m) = (0.0f64, 0.0f64, 0.0f64);
    for i in (0..fixed.len()).filter(|&i| selected(i)) {
        let df = fixed[i] as f64 - mean_f;
        let dm = moving[i] as f64 - mean_m;
        cov += df * dm;
        var_f += df * df;
        var_m += dm * dm;
    }
    if var_f == 0.0 || var_m == 0.0 {
        return Err(EvaluationError::Undefined(
            "constant volume has no correlation".into(),
        ));
    }
    Ok((cov / (var_f.sqrt() * var_m.sqrt())).clamp(-1.0, 1.0))
}

/// Similarity between the fixed volume and the registered moving volume.
pub struct NccEvaluator {
    source: Arc<dyn VolumeSource>,
}

impl NccEvaluator {
    pub const METRIC: &'static str = "ncc";

    pub fn new(source: Arc<dyn VolumeSource>) -> Self {
        Self { source }
    }
}

impl RegistrationEvaluator for NccEvaluator {
    fn metric(&self) -> &str {
        Self::METRIC
    }

    fn higher_is_better(&self) -> bool {
        true
    }

    fn evaluate(&self, target: &EvaluationTarget<'_>) -> Result<f64, EvaluationError> {
        let fixed = self.source.fixed_volume(&target.problem)?;
        let moving = self
            .source
            .registered_volume(&target.problem, &target.resolution)?;
        let mask = match target.mask {
            Some(path) => Some(self.source.mask_volume(path, target.problem.fixed)?),
            None => None,
        };
        calculate_ncc(&fixed, &moving, mask.as_deref())
    }
}

/// Mean distance from each registered moving centroid to its nearest fixed
/// centroid. Lower is better.
pub struct CentroidEvaluator {
    source: Arc<dyn CentroidSource>,
}

impl CentroidEvaluator {
    pub const METRIC: &'static str = "centroid_distance";

    pub fn new(source: Arc<dyn CentroidSource>) -> Self {
        Self { source }
    }
}

impl RegistrationEvaluator for CentroidEvaluator {
    fn metric(&self) -> &str {
        Self::METRIC
    }

    fn evaluate(&self, target: &EvaluationTarget<'_>) -> Result<f64, EvaluationError> {
        let fixed = self.source.fixed_centroids(&target.problem)?;
        let moving = self
            .source
            .registered_centroids(&target.problem, &target.resolution)?;
        if fixed.is_empty() || moving.is_empty() {
            return Err(EvaluationError::Undefined("no centroids to match".into()));
        }
        let total: f64 = moving
            .iter()
            .map(|m| {
                fixed
                    .iter()
                    .map(|f| distance(f, m))
                    .fold(f64::INFINITY, f64::min)
            })
            .sum();
        Ok(total / moving.len() as f64)
    }
}

fn distance(a: &[f64; 3], b: &[f64; 3]) -> f64 {
    a.iter()
        .zip(b)
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f64>()
        .sqrt()
}

/// Manual annotation: 1.0 when an operator flagged the problem as bad, else 0.0.
#[derive(Debug, Clone, Default)]
pub struct AnnotationEvaluator {
    flagged: BTreeSet<RegistrationProblem>,
}

impl AnnotationEvaluator {
    pub const METRIC: &'static str = "manual_annotation";

    pub fn new<I: IntoIterator<Item = RegistrationProblem>>(flagged: I) -> Self {
        Self {
            flagged: flagged.into_iter().collect(),
        }
    }

    /// Load flagged problems from an edge-list style file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, GraphError> {
        Ok(Self::new(EdgeList::load(path)?.problems()))
    }

    pub fn is_flagged(&self, problem: &RegistrationProblem) -> bool {
        self.flagged.contains(problem)
    }
}

impl RegistrationEvaluator for AnnotationEvaluator {
    fn metric(&self) -> &str {
        Self::METRIC
    }

    fn evaluate(&self, target: &EvaluationTarget<'_>) -> Result<f64, EvaluationError> {
        Ok(if self.is_flagged(&target.problem) {
            1.0
        } else {
            0.0
        })
    }
}

/// Evaluator strategies selectable from configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvaluatorKind {
    Ncc,
    CentroidDistance,
    ManualAnnotation,
}

impl EvaluatorKind {
    pub fn metric(&self) -> &'static str {
        match self {
            Self::Ncc => NccEvaluator::METRIC,
            Self::CentroidDistance => CentroidEvaluator::METRIC,
            Self::ManualAnnotation => AnnotationEvaluator::METRIC,
        }
    }

    pub fn higher_is_better(&self) -> bool {
        matches!(self, Self::Ncc)
    }
}

impl fmt::Display for EvaluatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.metric())
    }
}

/// Data sources available to [`EvaluatorSet::build`].
#[derive(Default, Clone)]
pub struct EvaluatorSources {
    pub volumes: Option<Arc<dyn VolumeSource>>,
    pub centroids: Option<Arc<dyn CentroidSource>>,
    pub annotations: Option<AnnotationEvaluator>,
}

/// Evaluators instantiated from a list of configured kinds.
pub struct EvaluatorSet {
    evaluators: Vec<Box<dyn RegistrationEvaluator>>,
}

impl EvaluatorSet {
    pub fn build(kinds: &[EvaluatorKind], sources: &EvaluatorSources) -> Result<Self, GraphError> {
        let mut evaluators: Vec<Box<dyn RegistrationEvaluator>> = Vec::new();
        for kind in kinds {
            let missing = || {
                GraphError::InvalidParameter(format!("no data source configured for {}", kind))
            };
            let evaluator: Box<dyn RegistrationEvaluator> = match kind {
                EvaluatorKind::Ncc => Box::new(NccEvaluator::new(
                    sources.volumes.clone().ok_or_else(missing)?,
                )),
                EvaluatorKind::CentroidDistance => Box::new(CentroidEvaluator::new(
                    sources.centroids.clone().ok_or_else(missing)?,
                )),
                EvaluatorKind::ManualAnnotation => Box::new(
                    sources.annotations.clone().unwrap_or_default(),
                ),
            };
            evaluators.push(evaluator);
        }
        Ok(Self { evaluators })
    }

    pub fn evaluators(&self) -> &[Box<dyn RegistrationEvaluator>] {
        &self.evaluators
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeVolumes;

    impl VolumeSource for FakeVolumes {
        fn fixed_volume(&self, _: &RegistrationProblem) -> Result<Vec<f32>, EvaluationError> {
            Ok(vec![1.0, 2.0, 3.0, 4.0])
        }

        fn registered_volume(
            &self,
            _: &RegistrationProblem,
            resolution: &Resolution,
        ) -> Result<Vec<f32>, EvaluationError> {
            match resolution.resolution {
                0 => Ok(vec![4.0, 3.0, 2.0, 1.0]),
                1 => Ok(vec![2.0, 4.0, 6.0, 8.0]),
                _ => Err(EvaluationError::MissingInput("result.mhd".into())),
            }
        }

        fn mask_volume(&self, _: &Path, _: FrameId) -> Result<Vec<bool>, EvaluationError> {
            Ok(vec![true, true, false, false])
        }
    }

    struct FakeCentroids;

    impl CentroidSource for FakeCentroids {
        fn fixed_centroids(
            &self,
            _: &RegistrationProblem,
        ) -> Result<Vec<[f64; 3]>, EvaluationError> {
            Ok(vec![[0.0, 0.0, 0.0], [10.0, 0.0, 0.0]])
        }

        fn registered_centroids(
            &self,
            _: &RegistrationProblem,
            _: &Resolution,
        ) -> Result<Vec<[f64; 3]>, EvaluationError> {
            Ok(vec![[0.0, 3.0, 4.0], [10.0, 1.0, 0.0]])
        }
    }

    fn target(resolution: usize) -> EvaluationTarget<'static> {
        EvaluationTarget {
            problem: RegistrationProblem::new(0, 1),
            resolution: Resolution::new(0, resolution),
            mask: None,
        }
    }

    #[test]
    fn test_ncc_perfect_and_anticorrelated() {
        let a = [1.0, 2.0, 3.0];
        assert!((calculate_ncc(&a, &[2.0, 4.0, 6.0], None).unwrap() - 1.0).abs() < 1e-12);
        assert!((calculate_ncc(&a, &[3.0, 2.0, 1.0], None).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ncc_errors() {
        assert!(matches!(
            calculate_ncc(&[1.0], &[1.0, 2.0], None),
            Err(EvaluationError::ShapeMismatch { .. })
        ));
        assert!(matches!(
            calculate_ncc(&[1.0, 1.0], &[1.0, 2.0], None),
            Err(EvaluationError::Undefined(_))
        ));
        assert!(matches!(
            calculate_ncc(&[1.0, 2.0], &[1.0, 2.0], Some(&[false, false])),
            Err(EvaluationError::Undefined(_))
        ));
    }

    #[test]
    fn test_ncc_mask_restricts_voxels() {
        let fixed = [1.0, 2.0, 100.0, -50.0];
        let moving = [1.0, 2.0, -3.0, 7.0];
        let masked = calculate_ncc(&fixed, &moving, Some(&[true, true, false, false])).unwrap();
        assert!((masked - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_ncc_evaluator() {
        let e = NccEvaluator::new(Arc::new(FakeVolumes));
        assert_eq!(e.metric(), "ncc");
        assert!(e.higher_is_better());
        assert!((e.evaluate(&target(0)).unwrap() + 1.0).abs() < 1e-12);
        assert!((e.evaluate(&target(1)).unwrap() - 1.0).abs() < 1e-12);
        assert!(matches!(
            e.evaluate(&target(2)),
            Err(EvaluationError::MissingInput(_))
        ));
    }

    #[test]
    fn test_ncc_evaluator_with_mask() {
        let e = NccEvaluator::new(Arc::new(FakeVolumes));
        let mask = Path::new("/masks");
        let t = EvaluationTarget {
            mask: Some(mask),
            ..target(0)
        };
        // two voxels, perfectly anti-correlated
        assert!((e.evaluate(&t).unwrap() + 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_centroid_evaluator() {
        let e = CentroidEvaluator::new(Arc::new(FakeCentroids));
        assert!(!e.higher_is_better());
        // distances 5 and 1
        assert!((e.evaluate(&target(0)).unwrap() - 3.0).abs() < 1e-12);
    }

    #[test]
    fn test_annotation_evaluator() {
        let e = AnnotationEvaluator::new([RegistrationProblem::new(0, 1)]);
        assert_eq!(e.evaluate(&target(0)).unwrap(), 1.0);
        let other = EvaluationTarget {
            problem: RegistrationProblem::new(1, 2),
            ..target(0)
        };
        assert_eq!(e.evaluate(&other).unwrap(), 0.0);
    }

    #[test]
    fn test_annotation_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.txt");
        std::fs::write(&path, "0 1\n4 9\n").unwrap();
        let e = AnnotationEvaluator::load(&path).unwrap();
        assert!(e.is_flagged(&RegistrationProblem::new(4, 9)));
        assert!(!e.is_flagged(&RegistrationProblem::new(9, 4)));
    }

    #[test]
    fn test_evaluator_set_from_kinds() {
        let sources = EvaluatorSources {
            volumes: Some(Arc::new(FakeVolumes)),
            ..Default::default()
        };
        let set = EvaluatorSet::build(
            &[EvaluatorKind::Ncc, EvaluatorKind::ManualAnnotation],
            &sources,
        )
        .unwrap();
        let metrics: Vec<&str> = set.evaluators().iter().map(|e| e.metric()).collect();
        assert_eq!(metrics, vec!["ncc", "manual_annotation"]);

        let err = EvaluatorSet::build(&[EvaluatorKind::CentroidDistance], &sources);
        assert!(matches!(err, Err(GraphError::InvalidParameter(_))));
    }

    #[test]
    fn test_kind_serde_names() {
        assert_eq!(
            serde_json::to_string(&EvaluatorKind::CentroidDistance).unwrap(),
            "\"centroid_distance\""
        );
        assert_eq!(EvaluatorKind::Ncc.to_string(), "ncc");
    }
}
