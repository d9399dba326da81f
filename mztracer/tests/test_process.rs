use std::{error::Error, process::Command};

use assert_cmd::prelude::*;
use predicates::prelude::*;

#[test]
fn test_file_missing() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mztracer")?;

    cmd.arg("not_real.mzML").arg("-o").arg("-");
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("NotFound"));
    Ok(())
}

#[test]
fn test_malformed_time_range() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mztracer")?;

    cmd.arg("not_real.mzML").arg("-o").arg("-").args(["-r", "a-z"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse time range start invalid float literal",
    ));

    let mut cmd = Command::cargo_bin("mztracer")?;

    cmd.arg("not_real.mzML").arg("-o").arg("-").args(["-r", "5-b"]);
    cmd.assert().failure().stderr(predicate::str::contains(
        "Failed to parse time range end invalid float literal",
    ));

    Ok(())
}

#[test]
fn test_malformed_charge_range() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mztracer")?;

    cmd.arg("not_real.mzML").args(["-z", "x-4"]);
    cmd.assert()
        .failure()
        .stderr(predicate::str::contains("--charge-range"));
    Ok(())
}

#[test]
fn test_run() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mztracer")?;
    cmd.env("RUST_LOG", "info");
    cmd.arg("./tests/data/synthetic_isotopes.mzML")
        .args(["-o", "-", "-t", "2"]);
    let result = cmd.assert().success();
    result
        .stderr(predicate::str::contains("Spectra Read: 40 | MS1 Spectra: 40"))
        .stderr(predicate::str::contains("Features:"))
        .stdout(predicate::str::starts_with("monoisotopic_mass\tcharge"));
    Ok(())
}

#[test]
fn test_run_subset() -> Result<(), Box<dyn Error>> {
    let mut cmd = Command::cargo_bin("mztracer")?;
    cmd.env("RUST_LOG", "info");
    cmd.arg("./tests/data/synthetic_isotopes.mzML")
        .args(["-o", "-", "-r", "10-29"]);
    cmd.assert()
        .success()
        .stderr(predicate::str::contains("MS1 Spectra: 20"));
    Ok(())
}
