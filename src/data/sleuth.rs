//! Loader for Sleuth-style plain-text foci files.
//!
//! The Sleuth format lists one study per block: comment lines naming the
//! experiment, a `// Subjects=N` line, then one `x y z` coordinate per line,
//! with blank lines between blocks. A `// Reference=<space>` line opens the
//! file and names the coordinate space the foci are reported in.

use crate::error::{CbmaError, Result};
use regex::Regex;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::Path;

/// One study: its label, sample size, and reported activation foci.
#[derive(Debug, Clone)]
pub struct Study {
    /// Experiment label, e.g. "Smith et al., 2009: Task A".
    pub label: String,
    /// Number of subjects contributing to the reported foci.
    pub sample_size: usize,
    /// Reported peak coordinates in mm.
    pub foci: Vec<[f64; 3]>,
}

/// A named collection of studies loaded from a Sleuth file.
///
/// Consumed read-only by the estimators. The name defaults to the source
/// file's stem and is carried explicitly from then on, so downstream output
/// naming never has to re-derive it from a path.
#[derive(Debug, Clone)]
pub struct FociDataset {
    name: String,
    reference_space: String,
    studies: Vec<Study>,
}

impl FociDataset {
    /// Load a dataset from a Sleuth text file.
    ///
    /// The dataset name is the file stem (`control.txt` -> `control`).
    pub fn from_sleuth<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_stem()
            .map(|s| s.to_string_lossy().to_string())
            .unwrap_or_else(|| "dataset".to_string());
        let file = File::open(path)?;
        Self::from_sleuth_reader(name, BufReader::new(file))
    }

    /// Parse Sleuth text from any reader under an explicit dataset name.
    pub fn from_sleuth_reader<R: Read>(name: String, reader: BufReader<R>) -> Result<Self> {
        let reference_re = Regex::new(r"(?i)^//\s*Reference\s*=\s*(\S+)").unwrap();
        let subjects_re = Regex::new(r"(?i)^//\s*Subjects\s*=\s*(\d+)").unwrap();

        let mut reference_space: Option<String> = None;
        let mut studies: Vec<Study> = Vec::new();

        // Per-block accumulation state.
        let mut labels: Vec<String> = Vec::new();
        let mut sample_size: Option<usize> = None;
        let mut foci: Vec<[f64; 3]> = Vec::new();
        let mut block_start_line = 0usize;

        let mut line_no = 0usize;
        for line in reader.lines() {
            line_no += 1;
            let line = line?;
            let trimmed = line.trim();

            if trimmed.is_empty() {
                flush_block(
                    &mut labels,
                    &mut sample_size,
                    &mut foci,
                    &mut studies,
                    block_start_line,
                    line_no,
                )?;
                continue;
            }

            if let Some(caps) = reference_re.captures(trimmed) {
                reference_space = Some(caps[1].to_string());
                continue;
            }
            if let Some(caps) = subjects_re.captures(trimmed) {
                if labels.is_empty() && sample_size.is_none() && foci.is_empty() {
                    block_start_line = line_no;
                }
                let n: usize = caps[1].parse().map_err(|_| CbmaError::Parse {
                    line: line_no,
                    message: format!("Invalid subject count '{}'", &caps[1]),
                })?;
                if n == 0 {
                    return Err(CbmaError::Parse {
                        line: line_no,
                        message: "Subject count must be at least 1".to_string(),
                    });
                }
                sample_size = Some(n);
                continue;
            }
            if let Some(rest) = trimmed.strip_prefix("//") {
                if labels.is_empty() && sample_size.is_none() && foci.is_empty() {
                    block_start_line = line_no;
                }
                labels.push(rest.trim().to_string());
                continue;
            }

            // A coordinate line.
            if labels.is_empty() && sample_size.is_none() && foci.is_empty() {
                return Err(CbmaError::Parse {
                    line: line_no,
                    message: "Coordinates before any study header".to_string(),
                });
            }
            let fields: Vec<&str> = trimmed.split_whitespace().collect();
            if fields.len() != 3 {
                return Err(CbmaError::Parse {
                    line: line_no,
                    message: format!(
                        "Expected 3 coordinates per line, found {}",
                        fields.len()
                    ),
                });
            }
            let mut coord = [0.0f64; 3];
            for (axis, field) in fields.iter().enumerate() {
                coord[axis] = field.parse().map_err(|_| CbmaError::Parse {
                    line: line_no,
                    message: format!("Invalid coordinate value '{}'", field),
                })?;
            }
            foci.push(coord);
        }
        flush_block(
            &mut labels,
            &mut sample_size,
            &mut foci,
            &mut studies,
            block_start_line,
            line_no,
        )?;

        if studies.is_empty() {
            return Err(CbmaError::EmptyData(format!(
                "Sleuth input '{}' contains no studies",
                name
            )));
        }

        Ok(Self {
            name,
            reference_space: reference_space.unwrap_or_else(|| "UNKNOWN".to_string()),
            studies,
        })
    }

    /// Dataset name used for output naming.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Replace the dataset name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Coordinate reference space declared by the file.
    pub fn reference_space(&self) -> &str {
        &self.reference_space
    }

    /// Studies in file order.
    pub fn studies(&self) -> &[Study] {
        &self.studies
    }

    /// Number of studies.
    pub fn n_studies(&self) -> usize {
        self.studies.len()
    }

    /// Total number of foci across studies.
    pub fn n_foci(&self) -> usize {
        self.studies.iter().map(|s| s.foci.len()).sum()
    }

    /// Fail unless both datasets declare the same reference space.
    pub fn check_same_reference(&self, other: &Self) -> Result<()> {
        if !self.reference_space.eq_ignore_ascii_case(&other.reference_space) {
            return Err(CbmaError::SpaceMismatch(format!(
                "'{}' is in {} but '{}' is in {}",
                self.name, self.reference_space, other.name, other.reference_space
            )));
        }
        Ok(())
    }
}

/// Close out a study block, validating it carried a subject count and at
/// least one focus.
fn flush_block(
    labels: &mut Vec<String>,
    sample_size: &mut Option<usize>,
    foci: &mut Vec<[f64; 3]>,
    studies: &mut Vec<Study>,
    block_start_line: usize,
    line: usize,
) -> Result<()> {
    if labels.is_empty() && sample_size.is_none() && foci.is_empty() {
        return Ok(());
    }
    let n = sample_size.take().ok_or_else(|| CbmaError::Parse {
        line,
        message: format!(
            "Study block starting at line {} has no '// Subjects=N' line",
            block_start_line
        ),
    })?;
    if foci.is_empty() {
        return Err(CbmaError::Parse {
            line,
            message: format!(
                "Study block starting at line {} lists no coordinates",
                block_start_line
            ),
        });
    }
    studies.push(Study {
        label: std::mem::take(labels).join("; "),
        sample_size: n,
        foci: std::mem::take(foci),
    });
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn parse(text: &str) -> Result<FociDataset> {
        FociDataset::from_sleuth_reader("test".to_string(), BufReader::new(text.as_bytes()))
    }

    #[test]
    fn test_parse_two_studies() {
        let ds = parse(
            "// Reference=MNI\n\
             // Smith et al., 2009: Task A\n\
             // Subjects=12\n\
             -38 -44 42\n\
             40 44 -8\n\
             \n\
             // Jones et al., 2010: Task B\n\
             // Subjects=15\n\
             0 -52 26\n",
        )
        .unwrap();

        assert_eq!(ds.reference_space(), "MNI");
        assert_eq!(ds.n_studies(), 2);
        assert_eq!(ds.n_foci(), 3);
        assert_eq!(ds.studies()[0].sample_size, 12);
        assert_eq!(ds.studies()[0].foci[0], [-38.0, -44.0, 42.0]);
        assert_eq!(ds.studies()[1].label, "Jones et al., 2010: Task B");
    }

    #[test]
    fn test_missing_subjects_line() {
        let err = parse(
            "// Reference=MNI\n\
             // Smith et al., 2009\n\
             10 20 30\n",
        )
        .unwrap_err();
        assert!(matches!(err, CbmaError::Parse { .. }));
    }

    #[test]
    fn test_malformed_coordinate_reports_line() {
        let err = parse(
            "// Reference=MNI\n\
             // Smith et al., 2009\n\
             // Subjects=12\n\
             10 twenty 30\n",
        )
        .unwrap_err();
        match err {
            CbmaError::Parse { line, .. } => assert_eq!(line, 4),
            other => panic!("expected parse error, got {:?}", other),
        }
    }

    #[test]
    fn test_wrong_coordinate_arity() {
        let err = parse(
            "// Reference=MNI\n\
             // Smith et al., 2009\n\
             // Subjects=12\n\
             10 20\n",
        )
        .unwrap_err();
        assert!(matches!(err, CbmaError::Parse { line: 4, .. }));
    }

    #[test]
    fn test_empty_file_is_empty_data() {
        let err = parse("// Reference=MNI\n").unwrap_err();
        assert!(matches!(err, CbmaError::EmptyData(_)));
    }

    #[test]
    fn test_study_without_foci() {
        let err = parse(
            "// Reference=MNI\n\
             // Smith et al., 2009\n\
             // Subjects=12\n",
        )
        .unwrap_err();
        assert!(matches!(err, CbmaError::Parse { .. }));
    }

    #[test]
    fn test_name_from_file_stem() {
        let mut file = NamedTempFile::with_suffix(".txt").unwrap();
        writeln!(file, "// Reference=MNI").unwrap();
        writeln!(file, "// Smith et al., 2009").unwrap();
        writeln!(file, "// Subjects=8").unwrap();
        writeln!(file, "1 2 3").unwrap();
        file.flush().unwrap();

        let ds = FociDataset::from_sleuth(file.path()).unwrap();
        let stem = file.path().file_stem().unwrap().to_string_lossy();
        assert_eq!(ds.name(), stem);
    }

    #[test]
    fn test_reference_space_mismatch() {
        let a = parse(
            "// Reference=MNI\n// S1\n// Subjects=5\n1 2 3\n",
        )
        .unwrap();
        let b = FociDataset::from_sleuth_reader(
            "other".to_string(),
            BufReader::new("// Reference=Talairach\n// S2\n// Subjects=5\n4 5 6\n".as_bytes()),
        )
        .unwrap();
        assert!(a.check_same_reference(&b).is_err());
        let c = parse("// Reference=MNI\n// S3\n// Subjects=5\n7 8 9\n").unwrap();
        assert!(a.check_same_reference(&c).is_ok());
    }
}
