use std::collections::HashSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use mztrace::blacklist::{Blacklist, CellRef, CellState};
use mztrace::dependency_graph::HypothesisDependenceGraph;
use mztrace::hypothesis::{ComponentScores, FeatureHypothesis, TraceBinding};
use mztrace::isotopic_model::{AveragineType, NEUTRON_SHIFT, PROTON};
use mztrace::signal::{FilteredExperiment, FilteredSpectrum, Peak};
use mztrace::trace::{MassTrace, TracePoint};
use mztrace::{Experiment, FeatureFinder, FeatureFinderError, FeatureFinderParams, Spectrum};

const N_SCANS: usize = 40;
const APEX_SCAN: f64 = 20.0;
const RT_SIGMA: f64 = 3.0;

fn gauss(x: f64, apex: f64) -> f64 {
    (-(x - apex).powi(2) / (2.0 * RT_SIGMA * RT_SIGMA)).exp()
}

/// One isotope envelope per `(monoisotopic mass, charge)` co-eluting at scan 20, plus a
/// constant background peak at m/z 300.
fn synthetic_experiment(analytes: &[(f64, i32)]) -> Experiment {
    synthetic_run(analytes, N_SCANS, APEX_SCAN, true)
}

/// `n_scans` spectra with every analyte eluting at `apex`. Without the background peak,
/// scans away from the apex hold nothing above the noise floor.
fn synthetic_run(analytes: &[(f64, i32)], n_scans: usize, apex: f64, background: bool) -> Experiment {
    let mut model = AveragineType::Peptide.caching_model().unwrap();
    let mut ladder: Vec<(f64, f64)> = Vec::new();
    for (mass, charge) in analytes.iter().copied() {
        let z = charge as f64;
        let mono_mz = mass / z + PROTON;
        let envelope = model.envelope(mono_mz, charge, 6);
        for (i, abundance) in envelope.into_iter().enumerate() {
            if abundance > 0.0 {
                ladder.push((mono_mz + i as f64 * NEUTRON_SHIFT / z, abundance * 1e6));
            }
        }
    }

    let mut experiment = Experiment::default();
    for scan in 0..n_scans {
        let mut peaks: Vec<(f64, f64)> = Vec::new();
        if background {
            peaks.push((300.0, 50.0));
        }
        let weight = gauss(scan as f64, apex);
        peaks.extend(
            ladder
                .iter()
                .map(|(mz, top)| (*mz, top * weight))
                .filter(|(_, int)| *int > 1e-3),
        );
        peaks.sort_by(|a, b| a.0.total_cmp(&b.0));
        experiment.push(Spectrum::from_pairs(scan, scan as f64, 1, peaks));
    }
    experiment
}

#[test_log::test]
fn test_single_pattern_round_trip() {
    let experiment = synthetic_experiment(&[(1500.0, 2)]);
    let output = FeatureFinder::default().find_features(&experiment).unwrap();

    assert_eq!(output.counts.spectra, N_SCANS);
    assert!(output.counts.traces >= 6);
    assert_eq!(output.features.len(), 1, "{:?}", output.features);
    let feature = &output.features[0];
    assert_eq!(feature.charge, 2);
    assert!(
        (feature.monoisotopic_mass - 1500.0).abs() < FeatureFinderParams::default().mass_tolerance,
        "{}",
        feature.monoisotopic_mass
    );
    assert!(feature.rt_start < APEX_SCAN && feature.rt_end > APEX_SCAN);
    assert_eq!(feature.apex_rt, APEX_SCAN);
    assert!(feature.constituent_trace_ids.len() >= 3);
    assert!(feature.quantitative_value > 0.0);
}

#[test]
fn test_round_trip_long_sparse_run() {
    let apex = 100.0;
    for analyte in [(1500.0, 2), (2400.0, 3)] {
        let experiment = synthetic_run(&[analyte], 200, apex, false);
        assert!(experiment.ms1().filter(|s| s.is_empty()).count() > 100);
        let output = FeatureFinder::default().find_features(&experiment).unwrap();
        assert!(output.counts.traces >= 3, "{:?}", output.counts);
        let feature = output
            .features
            .iter()
            .find(|f| f.charge == analyte.1)
            .unwrap_or_else(|| panic!("{analyte:?} not recovered from {:?}", output.features));
        assert!(
            (feature.monoisotopic_mass - analyte.0).abs() < FeatureFinderParams::default().mass_tolerance,
            "{}",
            feature.monoisotopic_mass
        );
        assert!(feature.rt_start < apex && feature.rt_end > apex);
        assert!(feature.rt_end - feature.rt_start < 40.0);
    }
}

#[test]
fn test_determinism() {
    let experiment = synthetic_experiment(&[(1500.0, 2), (2200.0, 3)]);
    let finder = FeatureFinder::builder().keep_hypotheses(true).build();
    let first = finder.find_features(&experiment).unwrap();
    let second = finder.find_features(&experiment).unwrap();
    assert_eq!(first.traces, second.traces);
    assert_eq!(first.features, second.features);
    assert_eq!(first.hypotheses, second.hypotheses);
    assert_eq!(first.counts, second.counts);
}

#[test]
fn test_minimum_spectra_guard() {
    for n in 0..3 {
        let experiment: Experiment = (0..n).map(|i| (i as f64, vec![(500.0, 1000.0)])).collect();
        let err = FeatureFinder::default()
            .find_features(&experiment)
            .unwrap_err();
        assert!(err.to_string().contains("fewer than 3 MS1 spectra"), "{err}");
    }
    let experiment: Experiment = (0..3).map(|i| (i as f64, vec![(500.0, 1000.0)])).collect();
    assert!(FeatureFinder::default().find_features(&experiment).is_ok());
}

#[test]
fn test_cancellation() {
    let experiment = synthetic_experiment(&[(1500.0, 2)]);
    let flag = Arc::new(AtomicBool::new(true));
    let finder = FeatureFinder::default().with_cancellation(flag);
    match finder.find_features(&experiment) {
        Err(FeatureFinderError::Cancelled { completed_apexes }) => {
            assert_eq!(completed_apexes, 0)
        }
        other => panic!("Expected cancellation, got {other:?}"),
    }
}

#[test]
fn test_multiplet_round_trip() {
    let shift = 8.0142;
    let experiment = synthetic_experiment(&[(1500.0, 2), (1500.0 + shift, 2)]);
    let params = FeatureFinderParams {
        mass_shifts: vec![0.0, shift],
        ..Default::default()
    };
    let output = FeatureFinder::new(params).find_features(&experiment).unwrap();
    assert_eq!(output.features.len(), 1, "{:?}", output.features);
    let feature = &output.features[0];
    assert_eq!(feature.charge, 2);
    assert!((feature.monoisotopic_mass - 1500.0).abs() < 1.5);
    assert_eq!(feature.channel_quantities.len(), 2);
    assert!(feature.channel_quantities.iter().all(|q| *q > 0.0));
    assert!(feature.mz_end > feature.mz_start + shift / 2.0);
}

fn flat_trace(id: usize, mz: f64) -> MassTrace {
    let points: Vec<TracePoint> = (0..5)
        .map(|i| TracePoint {
            rt: i as f64,
            cell: CellRef::new(i, id),
            peak: Peak::new(mz, 100.0, i),
        })
        .collect();
    MassTrace {
        id,
        points,
        centroid_mz: mz,
        centroid_sd: 0.001,
        centroid_rt: 2.0,
        quality: 1.0,
        fwhm: None,
        area: 400.0,
        median_intensity: 100.0,
        max_intensity: 100.0,
    }
}

fn hypothesis(id: usize, seed: usize, bound: &[usize], score: f64, traces: &[MassTrace]) -> FeatureHypothesis {
    let bindings = bound
        .iter()
        .enumerate()
        .map(|(isotope, trace)| TraceBinding {
            peptide: 0,
            isotope,
            trace: *trace,
            score,
        })
        .collect();
    FeatureHypothesis::new(id, 2, vec![0.0], 6, seed, bindings, ComponentScores::default(), traces)
}

#[test]
fn test_conflict_resolution() {
    let traces: Vec<_> = (0..7).map(|i| flat_trace(i, 600.0 + i as f64 * 0.5)).collect();
    let a = hypothesis(0, 0, &[0, 1, 2, 3], 0.3, &traces);
    let b = hypothesis(1, 3, &[3, 4, 5, 6], 0.2, &traces);
    assert!(a.feature_score > b.feature_score);

    let mut graph = HypothesisDependenceGraph::new();
    graph.add_hypothesis(b);
    graph.add_hypothesis(a);
    let solutions = graph.solutions(&traces, 3, 0.0);
    assert_eq!(solutions.len(), 1);
    let winners = &solutions[0].1;
    assert_eq!(winners.len(), 2);
    assert_eq!(winners[0].id, 0);
    assert!(winners[0].contains_trace(3));
    assert!(!winners[1].contains_trace(3));

    let mut seen = HashSet::new();
    for w in winners {
        for t in w.trace_ids() {
            assert!(seen.insert(t), "trace {t} emitted twice");
        }
    }
}

#[test]
fn test_multiplet_siblings_share_claims() {
    let experiment = FilteredExperiment {
        spectra: (0..3)
            .map(|i| FilteredSpectrum {
                source_index: i,
                rt: i as f64,
                peaks: vec![Peak::new(500.0, 100.0, i), Peak::new(504.0, 100.0, i)],
            })
            .collect(),
    };
    let mut blacklist = Blacklist::new(&experiment);
    let cell = CellRef::new(1, 1);
    // two channels landing on the same isotope position
    assert_eq!(blacklist.claim(cell, 4), Ok(true));
    assert_eq!(blacklist.claim(cell, 4), Ok(false));
    assert_eq!(blacklist.state(cell), CellState::Claimed(4));
    // a different position is refused and the claim stands
    assert!(blacklist.claim(cell, 5).is_err());
    assert_eq!(blacklist.state(cell), CellState::Claimed(4));
}
