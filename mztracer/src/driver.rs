use std::io;
use std::path::PathBuf;
use std::str::FromStr;
use std::thread;
use std::time::Instant;

use clap::Parser;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use mzdata::prelude::*;
use mzdata::spectrum::{
    MultiLayerSpectrum, SignalContinuity, SpectrumConversionError, SpectrumProcessingError,
};
use mzdata::MZReader;
use mzpeaks::prelude::*;

use mztrace::{Experiment, FeatureFinder, FeatureFinderError, FeatureFinderParams, Spectrum};

use crate::args::{non_negative_float, ArgAveragine, ArgChargeRange};
use crate::progress::ProgressRecord;
use crate::time_range::TimeRange;
use crate::write::write_output;

#[derive(Debug, Error)]
pub enum MZTracerError {
    #[error("An IO error occurred: {0}")]
    IOError(
        #[source]
        #[from]
        io::Error,
    ),
    #[error("Failed to read the configuration: {0}")]
    ConfigurationError(
        #[source]
        #[from]
        figment::Error,
    ),
    #[error("Failed to centroid a spectrum: {0}")]
    SpectrumProcessingError(
        #[source]
        #[from]
        SpectrumProcessingError,
    ),
    #[error("Failed to read peaks from a spectrum: {0}")]
    SpectrumConversionError(
        #[source]
        #[from]
        SpectrumConversionError,
    ),
    #[error("Feature finding failed: {0}")]
    FeatureFinderError(
        #[source]
        #[from]
        FeatureFinderError,
    ),
}

/// Mass trace detection and feature finding for LC-MS data.
///
/// Read a file of MS1 spectra, trace isotopic signal through time, assemble the
/// traces into charge-resolved features, and write them out as a table or JSON.
#[derive(Parser, Debug, Clone, Deserialize, Serialize)]
#[command(author, version)]
pub struct MZTracer {
    /// The path to read the input spectra from
    #[arg()]
    pub input_file: String,

    /// The path to write the features to, or if '-' is passed, write to STDOUT.
    ///
    /// A `.json` extension writes JSON, anything else is written as tab-separated text.
    #[arg(short = 'o', long = "output-file", default_value = "-")]
    pub output_file: PathBuf,

    /// The path to write a log file to, in addition to STDERR
    #[arg(short = 'l', long = "log-file")]
    pub log_file: Option<PathBuf>,

    /// A TOML configuration file to read additional parameters from.
    ///
    /// Configurations are also read from `mztracer.toml` in the working directory.
    /// Environment variables prefixed with `MZTRACER_` will be read too.
    #[arg(long = "config-file")]
    pub config_file: Option<PathBuf>,

    /// The number of threads to use, passing a value < 1 to use all available threads
    #[arg(
        short='t',
        long="threads",
        default_value_t=-1,
    )]
    pub threads: i32,

    /// The time range to process, denoted (start?)-(stop?)
    #[arg(
        short='r',
        long="time-range",
        value_parser=TimeRange::from_str,
        value_name="BEGIN-END",
        long_help=r#"The time range to process, denoted (start?)-(stop?)

If a start is not specified, processing begins from the start of the run.
If a stop is not specified, processing stops at the end of the run.
"#
    )]
    pub time_range: Option<TimeRange>,

    /// The range of charge states to consider for each pattern denoted (low)-(high) or (high).
    ///
    /// Defaults to 1-4 unless the configuration says otherwise.
    #[arg(short = 'z', long = "charge-range")]
    pub charge_range: Option<ArgChargeRange>,

    /// The m/z tolerance used to extend mass traces, in parts-per-million. Defaults to 20.
    #[arg(
        short = 'p',
        long = "mass-error-ppm",
        value_parser = non_negative_float
    )]
    pub mass_error_ppm: Option<f64>,

    /// The noise floor. Peaks at or below this intensity are discarded before trace
    /// detection. Defaults to 10.
    #[arg(
        short = 'n',
        long = "noise-threshold",
        value_parser = non_negative_float
    )]
    pub noise_threshold: Option<f64>,

    /// The average monomer model used to score isotopic patterns. Defaults to peptide.
    #[arg(short = 'a', long = "averagine")]
    pub averagine: Option<ArgAveragine>,

    /// Every other feature finding parameter.
    ///
    /// Read from the `params` table of the configuration. The options above take
    /// precedence over the same values given here when they are set.
    #[arg(skip)]
    #[serde(default)]
    pub params: FeatureFinderParams,
}

impl MZTracer {
    fn create_threadpool(&self) -> io::Result<rayon::ThreadPool> {
        let num_threads = if self.threads > 0 {
            self.threads as usize
        } else {
            thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        };
        debug!("Using {} cores", num_threads);
        rayon::ThreadPoolBuilder::new()
            .num_threads(num_threads)
            .build()
            .map_err(io::Error::other)
    }

    /// Combine the `params` table with whichever command line options were given
    pub fn make_finder(&self) -> FeatureFinder {
        let mut builder = FeatureFinder::builder();
        builder.params(self.params.clone());
        if let Some(charge_range) = self.charge_range {
            builder.charge_range(charge_range.into());
        }
        if let Some(ppm) = self.mass_error_ppm {
            builder.mass_error_ppm(ppm);
        }
        if let Some(noise) = self.noise_threshold {
            builder.noise_threshold(noise);
        }
        if let Some(averagine) = self.averagine {
            builder.averagine(averagine.into());
        }
        builder.build()
    }

    pub fn main(&self) -> Result<(), MZTracerError> {
        info!(
            "mztracer v{}",
            option_env!("CARGO_PKG_VERSION").unwrap_or("unknown")
        );
        info!("Input: {}", self.input_file);
        info!("Output: {}", self.output_file.display());
        match toml::to_string_pretty(self) {
            Ok(config) => debug!("Configuration:\n{config}"),
            Err(e) => warn!("Failed to render the configuration: {e}"),
        }
        self.create_threadpool()?.install(|| self.run_workflow())
    }

    fn centroid_spectrum(
        mut scan: MultiLayerSpectrum,
    ) -> Result<(f64, Vec<(f64, f64)>, ProgressRecord), MZTracerError> {
        let mut prog = ProgressRecord {
            ms1_spectra: 1,
            ..Default::default()
        };
        if scan.signal_continuity() == SignalContinuity::Profile {
            scan.pick_peaks(1.0)?;
            scan.description_mut().signal_continuity = SignalContinuity::Centroid;
            prog.profile_spectra = 1;
        }
        let rt = scan.start_time();
        let peaks = scan.try_build_centroids()?;
        let pairs: Vec<(f64, f64)> = peaks
            .iter()
            .map(|p| (p.mz(), p.intensity() as f64))
            .collect();
        prog.ms1_peaks = pairs.len();
        Ok((rt, pairs, prog))
    }

    /// Read the MS1 spectra within the time range and centroid them into an [`Experiment`]
    pub fn read_experiment(&self) -> Result<(Experiment, ProgressRecord), MZTracerError> {
        let reader = MZReader::open_path(&self.input_file)?;
        let time_range = self.time_range.unwrap_or_default();
        if self.time_range.is_some() {
            info!("Processing {time_range}");
        }

        let mut spectra_read = 0usize;
        let scans: Vec<MultiLayerSpectrum> = reader
            .into_iter()
            .inspect(|_| spectra_read += 1)
            .take_while(|s| !time_range.is_past(s.start_time()))
            .filter(|s| s.ms_level() == 1 && time_range.contains(s.start_time()))
            .collect();

        let centroided: Vec<_> = scans
            .into_par_iter()
            .map(Self::centroid_spectrum)
            .collect::<Result<_, _>>()?;

        let mut prog: ProgressRecord = centroided.iter().map(|(_, _, p)| *p).sum();
        prog.spectra_read = spectra_read;

        let experiment = Experiment::new(
            centroided
                .into_iter()
                .enumerate()
                .map(|(i, (rt, pairs, _))| Spectrum::from_pairs(i, rt, 1, pairs))
                .collect(),
        );
        Ok((experiment, prog))
    }

    fn run_workflow(&self) -> Result<(), MZTracerError> {
        let start = Instant::now();
        let (experiment, prog) = self.read_experiment()?;
        let read_done = Instant::now();
        debug!(
            "Read {} MS1 spectra in {:0.3?}",
            experiment.len(),
            read_done - start
        );

        let output = self.make_finder().find_features(&experiment)?;
        let prog = prog.with_counts(&output.counts);
        prog.log();
        info!("Feature Finding Time: {:0.3?}", Instant::now() - read_done);

        write_output(&output.features, &self.output_file)?;
        info!("Elapsed Time: {:0.3?}", start.elapsed());
        Ok(())
    }
}
