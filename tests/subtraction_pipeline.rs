//! Integration tests for the subtraction pipeline.

use cbma_contrast::prelude::*;
use approx::assert_relative_eq;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::tempdir;

/// Write a Sleuth file with `n_studies` studies whose foci jitter around a
/// center coordinate, and return its path.
fn write_sleuth(
    dir: &Path,
    file_name: &str,
    n_studies: usize,
    center_mm: [f64; 3],
) -> PathBuf {
    let path = dir.join(file_name);
    let mut file = fs::File::create(&path).unwrap();
    writeln!(file, "// Reference=MNI").unwrap();
    writeln!(file).unwrap();
    for study in 0..n_studies {
        writeln!(file, "// Author{} et al., 20{:02}: Experiment", study, 10 + study).unwrap();
        writeln!(file, "// Subjects={}", 10 + study % 5).unwrap();
        // Two foci per study, jittered by study index within the kernel width.
        let jitter = (study % 3) as f64 * 2.0 - 2.0;
        writeln!(
            file,
            "{} {} {}",
            center_mm[0] + jitter,
            center_mm[1],
            center_mm[2]
        )
        .unwrap();
        writeln!(
            file,
            "{} {} {}",
            center_mm[0],
            center_mm[1] + jitter,
            center_mm[2]
        )
        .unwrap();
        writeln!(file).unwrap();
    }
    path
}

/// Reference scenario: 12 control studies vs 9 patient studies on a small
/// 2 mm grid, seed 1234, 10 iterations.
fn scenario_config(input_dir: &Path, output_dir: &Path) -> SubtractionConfig {
    let control = write_sleuth(input_dir, "control.txt", 12, [12.0, 12.0, 12.0]);
    let patient = write_sleuth(input_dir, "patient.txt", 9, [36.0, 36.0, 36.0]);

    let mut config = SubtractionConfig::new(control, patient, output_dir);
    config.threshold = ThresholdParams {
        voxel_p: 0.001,
        cluster_size_mm3: 200.0,
        two_sided: true,
        connectivity: Connectivity::Faces,
    };
    config.n_iterations = 10;
    config.seed = Some(1234);
    config.space = Some(SpaceSpec {
        shape: [24, 24, 24],
        voxel_size_mm: 2.0,
        origin_mm: [0.0, 0.0, 0.0],
    });
    config
}

#[test]
fn test_end_to_end_subtraction() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let config = scenario_config(input.path(), output.path());

    let outcome = run_subtraction(&config).unwrap();

    // Naming derives from the dataset file stems.
    assert_eq!(
        outcome.z_path.file_name().unwrap(),
        "control_minus_patient_z.nii.gz"
    );
    assert_eq!(
        outcome.z_thresh_path.file_name().unwrap(),
        "control_minus_patient_z_thresh.nii.gz"
    );
    assert!(outcome.z_path.exists());
    assert!(outcome.z_thresh_path.exists());

    // The derived statistics promised by the parameters.
    assert_relative_eq!(outcome.report.critical_value, 3.2905, epsilon = 1e-3);
    assert_eq!(outcome.report.min_cluster_voxels, 25);
    assert_eq!(outcome.seed, 1234);

    // 10 permutations resolve z only up to ~1.34, so nothing can survive a
    // 3.29 critical value; the thresholded map is empty but the run is not.
    assert!(!outcome.report.empty_input);
    assert!(outcome.z_map.n_nonzero() > 0);
    assert_eq!(outcome.report.n_voxels_retained, 0);
    assert!(outcome.z_thresh.is_all_zero());

    // The persisted z map is a valid volume in the configured space.
    let loaded = read_nifti(&outcome.z_path).unwrap();
    assert_eq!(loaded.shape(), (24, 24, 24));
}

#[test]
fn test_rerun_is_byte_identical() {
    let input = tempdir().unwrap();
    let out_a = tempdir().unwrap();
    let out_b = tempdir().unwrap();

    let config_a = scenario_config(input.path(), out_a.path());
    let mut config_b = config_a.clone();
    config_b.output_dir = out_b.path().to_path_buf();

    let first = run_subtraction(&config_a).unwrap();
    let second = run_subtraction(&config_b).unwrap();

    assert_eq!(
        fs::read(&first.z_path).unwrap(),
        fs::read(&second.z_path).unwrap()
    );
    assert_eq!(
        fs::read(&first.z_thresh_path).unwrap(),
        fs::read(&second.z_thresh_path).unwrap()
    );
}

#[test]
fn test_signed_effect_direction() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let config = scenario_config(input.path(), output.path());

    let outcome = run_subtraction(&config).unwrap();
    let space = outcome.z_map.space().clone();

    // Control studies cluster at 12 mm, patients at 36 mm.
    let at_control = space.mm_to_voxel([12.0, 12.0, 12.0]).unwrap();
    let at_patient = space.mm_to_voxel([36.0, 36.0, 36.0]).unwrap();
    assert!(outcome.z_map.data()[at_control] > 0.0);
    assert!(outcome.z_map.data()[at_patient] < 0.0);
}

#[test]
fn test_directional_maps_reconstruct_contrast() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let mut config = scenario_config(input.path(), output.path());
    // Lenient enough for 10 permutations to clear the voxel threshold.
    config.threshold.voxel_p = 0.2;
    config.threshold.cluster_size_mm3 = 0.0;
    config.write_directional = true;

    let outcome = run_subtraction(&config).unwrap();
    assert!(outcome.report.n_voxels_retained > 0);

    let (path_ab, path_ba) = outcome.directional_paths.unwrap();
    let a_gt_b = read_nifti(&path_ab).unwrap();
    let b_gt_a = read_nifti(&path_ba).unwrap();
    let thresh = read_nifti(&outcome.z_thresh_path).unwrap();

    for ((a, b), t) in a_gt_b
        .data()
        .iter()
        .zip(b_gt_a.data().iter())
        .zip(thresh.data().iter())
    {
        assert!(*a == 0.0 || *b == 0.0, "directions must not overlap");
        assert_relative_eq!(a - b, *t, epsilon = 1e-6);
    }
}

#[test]
fn test_conjunction_of_persisted_maps() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let mut config = scenario_config(input.path(), output.path());
    config.threshold.voxel_p = 0.2;
    config.threshold.cluster_size_mm3 = 0.0;

    let outcome = run_subtraction(&config).unwrap();
    let thresh = read_nifti(&outcome.z_thresh_path).unwrap();

    // A map conjoined with itself is itself.
    let shared = conjunction(&thresh, &thresh).unwrap();
    assert_eq!(shared.data(), thresh.data());
}

#[test]
fn test_run_report_records_parameters() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();
    let config = scenario_config(input.path(), output.path());

    let outcome = run_subtraction(&config).unwrap();
    let report: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(&outcome.report_path).unwrap()).unwrap();

    assert_eq!(report["seed"], 1234);
    assert_eq!(report["n_iterations"], 10);
    assert_eq!(report["contrast"]["minuend"], "control");
    assert_eq!(report["contrast"]["subtrahend"], "patient");
    assert_relative_eq!(
        report["result"]["critical_value"].as_f64().unwrap(),
        3.2905,
        epsilon = 1e-3
    );
}

#[test]
fn test_malformed_dataset_aborts_run() {
    let input = tempdir().unwrap();
    let output = tempdir().unwrap();

    let control = write_sleuth(input.path(), "control.txt", 3, [12.0, 12.0, 12.0]);
    let broken = input.path().join("patient.txt");
    fs::write(
        &broken,
        "// Reference=MNI\n// Author\n// Subjects=9\n12 not-a-number 30\n",
    )
    .unwrap();

    let mut config = SubtractionConfig::new(control, broken, output.path());
    config.n_iterations = 5;
    config.seed = Some(1);
    config.space = Some(SpaceSpec {
        shape: [16, 16, 16],
        voxel_size_mm: 2.0,
        origin_mm: [0.0, 0.0, 0.0],
    });

    let err = run_subtraction(&config).unwrap_err();
    assert!(matches!(err, CbmaError::Parse { .. }));
    // Nothing was written for the failed contrast.
    assert!(fs::read_dir(output.path()).unwrap().next().is_none());
}
