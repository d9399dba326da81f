use std::fs;
use std::io::{self, Write};
use std::path::Path;

use itertools::Itertools;
use tracing::debug;

use mztrace::Feature;

/// The tabular and structured formats features can be written in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Tsv,
    Json,
}

impl OutputFormat {
    /// Pick a format from the path's extension, where anything but `.json` is tabular
    pub fn infer_from_path(path: &Path) -> Self {
        match path.extension().and_then(|e| e.to_str()) {
            Some(ext) if ext.eq_ignore_ascii_case("json") => Self::Json,
            _ => Self::Tsv,
        }
    }
}

const TSV_HEADER: [&str; 11] = [
    "monoisotopic_mass",
    "charge",
    "rt_start",
    "rt_end",
    "apex_rt",
    "mz_start",
    "mz_end",
    "quantitative_value",
    "quality_score",
    "constituent_trace_ids",
    "channel_quantities",
];

pub fn write_features_tsv<W: Write>(features: &[Feature], mut writer: W) -> io::Result<()> {
    writeln!(writer, "{}", TSV_HEADER.join("\t"))?;
    for f in features {
        writeln!(
            writer,
            "{:.6}\t{}\t{:.4}\t{:.4}\t{:.4}\t{:.6}\t{:.6}\t{}\t{:.4}\t{}\t{}",
            f.monoisotopic_mass,
            f.charge,
            f.rt_start,
            f.rt_end,
            f.apex_rt,
            f.mz_start,
            f.mz_end,
            f.quantitative_value,
            f.quality_score,
            f.constituent_trace_ids.iter().join(","),
            f.channel_quantities.iter().join(";"),
        )?;
    }
    writer.flush()
}

pub fn write_features_json<W: Write>(features: &[Feature], mut writer: W) -> io::Result<()> {
    serde_json::to_writer_pretty(&mut writer, features)?;
    writeln!(writer)?;
    writer.flush()
}

/// Write `features` to `path`, or STDOUT if it is `-`, which is always tabular
pub fn write_output(features: &[Feature], path: &Path) -> io::Result<()> {
    if path == Path::new("-") {
        let stdout = io::stdout();
        return write_features_tsv(features, stdout.lock());
    }
    let format = OutputFormat::infer_from_path(path);
    debug!("Writing {} features to {} as {format:?}", features.len(), path.display());
    let handle = io::BufWriter::new(fs::File::create(path)?);
    match format {
        OutputFormat::Tsv => write_features_tsv(features, handle),
        OutputFormat::Json => write_features_json(features, handle),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn make_feature() -> Feature {
        Feature {
            monoisotopic_mass: 1500.0,
            charge: 2,
            rt_start: 10.0,
            rt_end: 14.0,
            mz_start: 751.007276,
            mz_end: 754.017,
            quantitative_value: 1200.0,
            quality_score: 1.5,
            constituent_trace_ids: vec![3, 4, 5],
            apex_rt: 12.0,
            channel_quantities: vec![1200.0],
        }
    }

    #[test]
    fn test_infer() {
        assert_eq!(OutputFormat::infer_from_path(Path::new("out.json")), OutputFormat::Json);
        assert_eq!(OutputFormat::infer_from_path(Path::new("out.JSON")), OutputFormat::Json);
        assert_eq!(OutputFormat::infer_from_path(Path::new("out.tsv")), OutputFormat::Tsv);
        assert_eq!(OutputFormat::infer_from_path(Path::new("out")), OutputFormat::Tsv);
    }

    #[test]
    fn test_write_tsv() -> io::Result<()> {
        let mut buf = Vec::new();
        write_features_tsv(&[make_feature()], &mut buf)?;
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with("monoisotopic_mass\tcharge"));
        let cols: Vec<_> = lines[1].split('\t').collect();
        assert_eq!(cols.len(), TSV_HEADER.len());
        assert_eq!(cols[0], "1500.000000");
        assert_eq!(cols[1], "2");
        assert_eq!(cols[9], "3,4,5");
        Ok(())
    }

    #[test]
    fn test_write_json() -> io::Result<()> {
        let mut buf = Vec::new();
        write_features_json(&[make_feature()], &mut buf)?;
        let parsed: Vec<Feature> = serde_json::from_slice(&buf)?;
        assert_eq!(parsed, vec![make_feature()]);
        Ok(())
    }
}
