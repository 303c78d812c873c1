//! Line-oriented text format for optical bar camera files.
//!
//! ```text
//! VERSION_4
//! OPTICAL_BAR
//! image_size = <int> <int>
//! image_center = <float> <float>
//! pitch = <float>
//! f = <float>
//! scan_angle = <float>
//! scan_rate = <float>
//! forward_tilt = <float>
//! iC = <float> <float> <float>
//! iR = <float> x 9, row-major
//! speed = <float>
//! mean_earth_radius = <float>
//! mean_surface_elevation = <float>
//! use_motion_compensation = <0|1>
//! scan_dir = <left|right>
//! ```
//!
//! Fields must appear in exactly this order. Only `scan_dir = left` selects a
//! right to left scan. Any other value, any other line, or no line at all
//! means the scan runs left to right.

use crate::{
    error::{Error, FormatError},
    optical_bar::OpticalBarModel,
    orientation::Orientation,
    params::{OpticalBarParams, ScanDirection},
};
use log::debug;
use nalgebra::{Matrix3, Vector2, Vector3};
use std::{
    fs::File,
    io::{BufRead, BufReader, BufWriter, Lines, Write},
    path::Path,
    str::FromStr,
};

/// Oldest file version this reader understands.
pub const MIN_VERSION: u32 = 4;

/// Version emitted by the writer.
pub const VERSION: u32 = 4;

pub const CAMERA_TYPE: &str = "OPTICAL_BAR";

const SCAN_DIR: &str = "scan_dir";

/// Values of a single `label = values...` line.
struct Values<'a> {
    label: &'static str,
    tokens: Vec<&'a str>,
}

impl Values<'_> {
    fn parse<T: FromStr>(&self, index: usize) -> Result<T, FormatError> {
        let token = self.tokens[index];
        token.parse().map_err(|_| FormatError::InvalidValue {
            label: self.label,
            value: token.to_string(),
        })
    }

    fn float(&self, index: usize) -> Result<f64, FormatError> {
        self.parse(index)
    }

    fn floats<const N: usize>(&self) -> Result<[f64; N], FormatError> {
        let mut values = [0.0; N];
        for (i, value) in values.iter_mut().enumerate() {
            *value = self.float(i)?;
        }
        Ok(values)
    }

    fn flag(&self, index: usize) -> Result<bool, FormatError> {
        match self.tokens[index] {
            "0" => Ok(false),
            "1" => Ok(true),
            other => Err(FormatError::InvalidValue {
                label: self.label,
                value: other.to_string(),
            }),
        }
    }
}

type FieldParser = fn(&Values, &mut OpticalBarParams) -> Result<(), FormatError>;

/// A required line of the camera file.
struct Field {
    label: &'static str,
    arity: usize,
    parse: FieldParser,
}

impl Field {
    fn new(label: &'static str, arity: usize, parse: FieldParser) -> Self {
        Self {
            label,
            arity,
            parse,
        }
    }
}

/// Required fields in file order, following the two header lines.
fn fields() -> [Field; 13] {
    [
        Field::new("image_size", 2, |v, p| {
            p.image_size = (v.parse(0)?, v.parse(1)?);
            Ok(())
        }),
        Field::new("image_center", 2, |v, p| {
            p.image_center = Vector2::from(v.floats::<2>()?);
            Ok(())
        }),
        Field::new("pitch", 1, |v, p| {
            p.pixel_pitch = v.float(0)?;
            Ok(())
        }),
        Field::new("f", 1, |v, p| {
            p.focal_length = v.float(0)?;
            Ok(())
        }),
        Field::new("scan_angle", 1, |v, p| {
            p.scan_angle = v.float(0)?;
            Ok(())
        }),
        Field::new("scan_rate", 1, |v, p| {
            p.scan_rate = v.float(0)?;
            Ok(())
        }),
        Field::new("forward_tilt", 1, |v, p| {
            p.forward_tilt = v.float(0)?;
            Ok(())
        }),
        Field::new("iC", 3, |v, p| {
            p.initial_position = Vector3::from(v.floats::<3>()?);
            Ok(())
        }),
        Field::new("iR", 9, |v, p| {
            let matrix = Matrix3::from_row_slice(&v.floats::<9>()?);
            p.initial_orientation =
                Orientation::from_matrix(&matrix).ok_or(FormatError::InvalidRotation)?;
            Ok(())
        }),
        Field::new("speed", 1, |v, p| {
            p.speed = v.float(0)?;
            Ok(())
        }),
        Field::new("mean_earth_radius", 1, |v, p| {
            p.mean_earth_radius = v.float(0)?;
            Ok(())
        }),
        Field::new("mean_surface_elevation", 1, |v, p| {
            p.mean_surface_elevation = v.float(0)?;
            Ok(())
        }),
        Field::new("use_motion_compensation", 1, |v, p| {
            p.motion_compensation = v.flag(0)?;
            Ok(())
        }),
    ]
}

/// Splits `line` into its label and values, checking both against the
/// expected `label` and `arity`.
fn split_field<'a>(
    line: &'a str,
    label: &'static str,
    arity: usize,
) -> Result<Values<'a>, FormatError> {
    let unexpected = || FormatError::UnexpectedLabel {
        expected: label,
        found: line.to_string(),
    };

    let (found, rest) = line.split_once('=').ok_or_else(unexpected)?;
    if found.trim() != label {
        return Err(unexpected());
    }

    let tokens: Vec<&str> = rest.split_whitespace().collect();
    if tokens.len() != arity {
        return Err(FormatError::WrongArity {
            label,
            expected: arity,
            found: tokens.len(),
        });
    }

    Ok(Values { label, tokens })
}

fn parse_version(line: &str) -> Result<u32, FormatError> {
    let version = line
        .strip_prefix("VERSION_")
        .and_then(|version| version.parse::<u32>().ok())
        .ok_or_else(|| FormatError::MissingVersion {
            found: line.to_string(),
        })?;

    match version >= MIN_VERSION {
        true => Ok(version),
        false => Err(FormatError::UnsupportedVersion {
            found: version,
            minimum: MIN_VERSION,
        }),
    }
}

fn parse_scan_direction(line: Option<&str>) -> ScanDirection {
    let is_left = line
        .and_then(|line| line.split_once('='))
        .is_some_and(|(label, value)| label.trim() == SCAN_DIR && value.trim() == "left");

    match is_left {
        true => ScanDirection::RightToLeft,
        false => ScanDirection::LeftToRight,
    }
}

/// Pulls trimmed lines from a reader while tracking the current line number.
struct LineReader<R> {
    lines: Lines<R>,
    line: usize,
}

impl<R: BufRead> LineReader<R> {
    fn new(reader: R) -> Self {
        Self {
            lines: reader.lines(),
            line: 0,
        }
    }

    /// Returns the next line, or `None` at the end of the input.
    fn next_line(&mut self) -> Result<Option<String>, Error> {
        match self.lines.next() {
            Some(line) => {
                self.line += 1;
                Ok(Some(line?.trim().to_string()))
            }
            None => Ok(None),
        }
    }

    fn require(&mut self, expected: &'static str) -> Result<String, Error> {
        self.next_line()?.ok_or_else(|| Error::UnexpectedEof {
            line: self.line + 1,
            expected,
        })
    }

    fn format_error(&self, source: FormatError) -> Error {
        Error::Format {
            line: self.line,
            source,
        }
    }
}

/// Attaches `path` to stream failures of an operation on that file.
fn with_path(path: &Path) -> impl FnOnce(Error) -> Error + '_ {
    move |err| match err {
        Error::Stream(source) => Error::Io {
            path: path.to_path_buf(),
            source,
        },
        other => other,
    }
}

fn format_floats(values: &[f64]) -> String {
    values
        .iter()
        .map(|value| format!("{value:.16e}"))
        .collect::<Vec<_>>()
        .join(" ")
}

impl OpticalBarModel {
    /// Parses a camera file from `reader`.
    ///
    /// Parsing stops at the first malformed or missing line. Anything after
    /// the `scan_dir` line is ignored. The parsed model has no ray
    /// corrections enabled.
    pub fn from_reader(reader: impl BufRead) -> Result<Self, Error> {
        let mut lines = LineReader::new(reader);

        let header = lines.require("VERSION_<n>")?;
        let version = parse_version(&header).map_err(|err| lines.format_error(err))?;

        let camera_type = lines.require(CAMERA_TYPE)?;
        if camera_type != CAMERA_TYPE {
            return Err(lines.format_error(FormatError::WrongCameraType {
                expected: CAMERA_TYPE,
                found: camera_type,
            }));
        }

        let mut params = OpticalBarParams::default();
        for field in fields() {
            let line = lines.require(field.label)?;
            split_field(&line, field.label, field.arity)
                .and_then(|values| (field.parse)(&values, &mut params))
                .map_err(|err| lines.format_error(err))?;
        }

        params.scan_direction = parse_scan_direction(lines.next_line()?.as_deref());

        debug!(
            "parsed version {version} optical bar camera with {} lines",
            lines.line
        );
        OpticalBarModel::new(params)
    }

    /// Writes the camera file to `writer`.
    ///
    /// The rotation is written as the matrix of the stored orientation, so it
    /// is always orthonormal. Floats carry enough digits to read back exactly.
    pub fn write_to(&self, mut writer: impl Write) -> Result<(), Error> {
        let p = self.params();
        let position = p.initial_position;
        let matrix = p.initial_orientation.matrix();
        let rows: Vec<f64> = matrix.transpose().iter().copied().collect();

        writeln!(writer, "VERSION_{VERSION}")?;
        writeln!(writer, "{CAMERA_TYPE}")?;
        writeln!(writer, "image_size = {} {}", p.image_size.0, p.image_size.1)?;
        writeln!(
            writer,
            "image_center = {}",
            format_floats(&[p.image_center.x, p.image_center.y])
        )?;
        writeln!(writer, "pitch = {}", format_floats(&[p.pixel_pitch]))?;
        writeln!(writer, "f = {}", format_floats(&[p.focal_length]))?;
        writeln!(writer, "scan_angle = {}", format_floats(&[p.scan_angle]))?;
        writeln!(writer, "scan_rate = {}", format_floats(&[p.scan_rate]))?;
        writeln!(writer, "forward_tilt = {}", format_floats(&[p.forward_tilt]))?;
        writeln!(
            writer,
            "iC = {}",
            format_floats(&[position.x, position.y, position.z])
        )?;
        writeln!(writer, "iR = {}", format_floats(&rows))?;
        writeln!(writer, "speed = {}", format_floats(&[p.speed]))?;
        writeln!(
            writer,
            "mean_earth_radius = {}",
            format_floats(&[p.mean_earth_radius])
        )?;
        writeln!(
            writer,
            "mean_surface_elevation = {}",
            format_floats(&[p.mean_surface_elevation])
        )?;
        writeln!(
            writer,
            "use_motion_compensation = {}",
            u8::from(p.motion_compensation)
        )?;

        let scan_dir = match p.scan_direction {
            ScanDirection::LeftToRight => "right",
            ScanDirection::RightToLeft => "left",
        };
        writeln!(writer, "{SCAN_DIR} = {scan_dir}")?;

        Ok(())
    }

    /// Reads a camera file from disk.
    pub fn read(path: impl AsRef<Path>) -> Result<Self, Error> {
        let path = path.as_ref();
        debug!("reading optical bar camera from {path:?}");

        let file = File::open(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        Self::from_reader(BufReader::new(file)).map_err(with_path(path))
    }

    /// Writes the camera file to disk, replacing any existing file.
    pub fn write(&self, path: impl AsRef<Path>) -> Result<(), Error> {
        let path = path.as_ref();
        debug!("writing optical bar camera to {path:?}");

        let file = File::create(path).map_err(|source| Error::Io {
            path: path.to_path_buf(),
            source,
        })?;

        let mut writer = BufWriter::new(file);
        self.write_to(&mut writer)
            .and_then(|_| writer.flush().map_err(Error::from))
            .map_err(with_path(path))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use rstest::rstest;

    const SAMPLE: &str = "\
VERSION_4
OPTICAL_BAR
image_size = 1000 800
image_center = 500 400
pitch = 7e-06
f = 0.61
scan_angle = 1.2
scan_rate = 2
forward_tilt = 0.26
iC = 6551000 0 0
iR = 0 0 -1 -1 0 0 0 1 0
speed = 7700
mean_earth_radius = 6371000
mean_surface_elevation = 120
use_motion_compensation = 1
scan_dir = left
";

    fn parse(text: &str) -> Result<OpticalBarModel, Error> {
        OpticalBarModel::from_reader(text.as_bytes())
    }

    fn replace_line(line: usize, replacement: &str) -> String {
        SAMPLE
            .lines()
            .enumerate()
            .map(|(i, text)| match i + 1 == line {
                true => replacement,
                false => text,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn format_failure(result: Result<OpticalBarModel, Error>) -> (usize, FormatError) {
        match result {
            Err(Error::Format { line, source }) => (line, source),
            other => panic!("expected a format failure, got {other:?}"),
        }
    }

    #[test]
    fn parses_sample() {
        let model = parse(SAMPLE).unwrap();

        assert_eq!(model.image_size(), (1000, 800));
        assert_eq!(model.image_center(), Vector2::new(500.0, 400.0));
        assert_eq!(model.pixel_pitch(), 7e-6);
        assert_eq!(model.focal_length(), 0.61);
        assert_eq!(model.scan_angle(), 1.2);
        assert_eq!(model.scan_rate(), 2.0);
        assert_eq!(model.forward_tilt(), 0.26);
        assert_eq!(model.initial_position(), Vector3::new(6_551_000.0, 0.0, 0.0));
        assert_eq!(model.speed(), 7700.0);
        assert_eq!(model.mean_earth_radius(), 6_371_000.0);
        assert_eq!(model.mean_surface_elevation(), 120.0);
        assert!(model.motion_compensation());
        assert_eq!(model.scan_direction(), ScanDirection::RightToLeft);
        assert_eq!(model.corrections(), crate::params::Corrections::none());

        let expected = Matrix3::new(0.0, 0.0, -1.0, -1.0, 0.0, 0.0, 0.0, 1.0, 0.0);
        assert_relative_eq!(model.initial_orientation().matrix(), expected, epsilon = 1e-15);
    }

    #[test]
    fn newer_versions_are_accepted() {
        let model = parse(&replace_line(1, "VERSION_7")).unwrap();
        assert_eq!(model.image_size(), (1000, 800));
    }

    #[rstest]
    #[case::old_version(1, "VERSION_3", FormatError::UnsupportedVersion { found: 3, minimum: 4 })]
    #[case::no_version(1, "OPTICAL_BAR", FormatError::MissingVersion { found: "OPTICAL_BAR".into() })]
    #[case::wrong_type(2, "PINHOLE", FormatError::WrongCameraType { expected: CAMERA_TYPE, found: "PINHOLE".into() })]
    #[case::wrong_label(5, "pixel_pitch = 7e-06", FormatError::UnexpectedLabel { expected: "pitch", found: "pixel_pitch = 7e-06".into() })]
    #[case::no_equals(6, "f 0.61", FormatError::UnexpectedLabel { expected: "f", found: "f 0.61".into() })]
    #[case::too_few(4, "image_center = 500", FormatError::WrongArity { label: "image_center", expected: 2, found: 1 })]
    #[case::too_many(12, "speed = 7700 1", FormatError::WrongArity { label: "speed", expected: 1, found: 2 })]
    #[case::bad_float(7, "scan_angle = wide", FormatError::InvalidValue { label: "scan_angle", value: "wide".into() })]
    #[case::fractional_size(3, "image_size = 1000.5 800", FormatError::InvalidValue { label: "image_size", value: "1000.5".into() })]
    #[case::bad_flag(15, "use_motion_compensation = 2", FormatError::InvalidValue { label: "use_motion_compensation", value: "2".into() })]
    #[case::reflection(11, "iR = 0 0 1 -1 0 0 0 1 0", FormatError::InvalidRotation)]
    fn rejects_malformed_line(
        #[case] line: usize,
        #[case] replacement: &str,
        #[case] expected: FormatError,
    ) {
        let result = parse(&replace_line(line, replacement));
        assert_eq!(format_failure(result), (line, expected));
    }

    #[test]
    fn missing_speed_is_rejected() {
        let text: String = SAMPLE
            .lines()
            .filter(|line| !line.starts_with("speed"))
            .map(|line| format!("{line}\n"))
            .collect();

        let (line, source) = format_failure(parse(&text));
        assert_eq!(line, 12);
        assert!(matches!(
            source,
            FormatError::UnexpectedLabel { expected: "speed", .. }
        ));
    }

    #[test]
    fn truncated_file_is_io_failure() {
        let text: String = SAMPLE.lines().take(11).map(|line| format!("{line}\n")).collect();

        match parse(&text) {
            Err(err @ Error::UnexpectedEof { line: 12, expected: "speed" }) => {
                assert!(err.is_io());
            }
            other => panic!("expected an unexpected end of file, got {other:?}"),
        }
    }

    #[test]
    fn missing_scan_dir_scans_left_to_right() {
        let text: String = SAMPLE.lines().take(15).map(|line| format!("{line}\n")).collect();
        assert_eq!(parse(&text).unwrap().scan_direction(), ScanDirection::LeftToRight);
    }

    #[rstest]
    #[case::left("scan_dir = left", ScanDirection::RightToLeft)]
    #[case::left_spaced("scan_dir=   left", ScanDirection::RightToLeft)]
    #[case::right("scan_dir = right", ScanDirection::LeftToRight)]
    #[case::unknown_value("scan_dir = up", ScanDirection::LeftToRight)]
    #[case::no_value("scan_dir =", ScanDirection::LeftToRight)]
    #[case::other_line("some trailing note", ScanDirection::LeftToRight)]
    #[case::blank("", ScanDirection::LeftToRight)]
    fn only_scan_dir_left_scans_right_to_left(
        #[case] replacement: &str,
        #[case] expected: ScanDirection,
    ) {
        let model = parse(&replace_line(16, replacement)).unwrap();
        assert_eq!(model.scan_direction(), expected);
    }

    #[test]
    fn trailing_lines_are_ignored() {
        let text = format!("{SAMPLE}some trailing note\n");
        assert!(parse(&text).is_ok());
    }

    #[test]
    fn invalid_parameters_are_format_failures() {
        let err = parse(&replace_line(5, "pitch = 0")).unwrap_err();
        assert!(matches!(err, Error::InvalidParameter { name: "pixel_pitch", .. }));
        assert!(err.is_format());
    }

    #[test]
    fn written_text_reads_back() {
        let model = parse(SAMPLE).unwrap();
        let mut buffer = Vec::new();
        model.write_to(&mut buffer).unwrap();

        let text = String::from_utf8(buffer).unwrap();
        assert!(text.starts_with("VERSION_4\nOPTICAL_BAR\nimage_size = 1000 800\n"));
        assert!(text.ends_with("use_motion_compensation = 1\nscan_dir = left\n"));

        let reread = parse(&text).unwrap();
        let mut expected = model.params().clone();
        expected.initial_orientation = reread.initial_orientation();
        assert_eq!(reread.params(), &expected);
        assert_relative_eq!(
            reread.initial_orientation().axis_angle(),
            model.initial_orientation().axis_angle(),
            epsilon = 1e-15
        );
    }
}
