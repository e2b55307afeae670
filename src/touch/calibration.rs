// src/touch/calibration.rs
//
// Four-point touchscreen calibration.
//
// The user touches four targets inset `screen_offset` pixels from the screen
// corners (top-left, top-right, bottom-right, bottom-left). From the raw
// readings we derive, per axis,
//
//     screen = intercept + (raw * num) / den
//
// using integer arithmetic throughout. Only the raw points and the offset are
// persisted; coefficients are recomputed on load.

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::CalibrationError;

// ============================================================================
// Constants
// ============================================================================

pub const SAMPLE_POINTS: usize = 4;

pub const DEFAULT_CALIBRATION_FILE: &str = "touchcal.dat";

/// Raw readings of the reference panel, used when no calibration file exists.
pub const DEFAULT_POINTS: [Point; SAMPLE_POINTS] = [
    Point::new(149, 825),
    Point::new(898, 852),
    Point::new(898, 210),
    Point::new(144, 193),
];
pub const DEFAULT_SCREEN_OFFSET: i32 = 30;

// ============================================================================
// Types
// ============================================================================

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Display resolution in pixels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScreenGeometry {
    pub width: i32,
    pub height: i32,
}

impl Default for ScreenGeometry {
    /// The 800x480 reference panel.
    fn default() -> Self {
        Self { width: 800, height: 480 }
    }
}

/// Raw samples from one calibration gesture plus the target inset.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CalibrationPoints {
    /// Top-left, top-right, bottom-right, bottom-left.
    pub points: [Point; SAMPLE_POINTS],
    pub screen_offset: i32,
}

impl Default for CalibrationPoints {
    fn default() -> Self {
        Self {
            points: DEFAULT_POINTS,
            screen_offset: DEFAULT_SCREEN_OFFSET,
        }
    }
}

impl CalibrationPoints {
    pub fn new(points: [Point; SAMPLE_POINTS], screen_offset: i32) -> Self {
        Self { points, screen_offset }
    }

    /// Where the four targets are drawn on `screen`.
    pub fn screen_targets(&self, screen: ScreenGeometry) -> [Point; SAMPLE_POINTS] {
        let o = self.screen_offset;
        let right = screen.width - 1 - o;
        let bottom = screen.height - 1 - o;
        [
            Point::new(o, o),
            Point::new(right, o),
            Point::new(right, bottom),
            Point::new(o, bottom),
        ]
    }
}

/// Per-axis transform: `screen = intercept + (raw * num) / den`.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Coefficients {
    pub x_num: i32,
    pub x_den: i32,
    pub x_intercept: i32,
    pub y_num: i32,
    pub y_den: i32,
    pub y_intercept: i32,
}

impl Coefficients {
    /// Leaves raw coordinates untouched.
    pub const IDENTITY: Coefficients = Coefficients {
        x_num: 1,
        x_den: 1,
        x_intercept: 0,
        y_num: 1,
        y_den: 1,
        y_intercept: 0,
    };

    /// Derive the transform from four raw samples.
    ///
    /// Each slope is the average of the estimates from the two opposite edges,
    /// and each intercept the average of the two edge intercepts. Fails if
    /// any edge has zero raw extent (coincident or collinear samples).
    pub fn compute(cal: &CalibrationPoints, screen: ScreenGeometry) -> Result<Self, CalibrationError> {
        let p = cal.points.map(|pt| (i64::from(pt.x), i64::from(pt.y)));
        let ofst = i64::from(cal.screen_offset);
        let width = i64::from(screen.width);
        let height = i64::from(screen.height);

        // top and bottom edges
        let xmd_1 = p[1].0 - p[0].0;
        let xmd_2 = p[2].0 - p[3].0;
        // left and right edges
        let ymd_1 = p[3].1 - p[0].1;
        let ymd_2 = p[2].1 - p[1].1;

        for (name, extent) in [("top", xmd_1), ("bottom", xmd_2), ("left", ymd_1), ("right", ymd_2)] {
            if extent == 0 {
                return Err(CalibrationError::Degenerate(format!(
                    "{} edge has no raw extent",
                    name
                )));
            }
        }

        let xmd = (xmd_1 + xmd_2) / 2;
        let ymd = (ymd_1 + ymd_2) / 2;
        if xmd == 0 || ymd == 0 {
            return Err(CalibrationError::Degenerate(
                "opposite edges cancel out".to_string(),
            ));
        }
        let xmt = width - 2 * ofst;
        let ymt = height - 2 * ofst;

        let xc1 = (width - (xmt * (p[0].0 + p[1].0)) / xmd_1) / 2;
        let xc2 = (width - (xmt * (p[2].0 + p[3].0)) / xmd_2) / 2;
        let yc1 = (height - (ymt * (p[3].1 + p[0].1)) / ymd_1) / 2;
        let yc2 = (height - (ymt * (p[2].1 + p[1].1)) / ymd_2) / 2;

        let narrow = |v: i64| {
            i32::try_from(v).map_err(|_| CalibrationError::Degenerate(format!("coefficient {} out of range", v)))
        };

        Ok(Coefficients {
            x_num: narrow(xmt)?,
            x_den: narrow(xmd)?,
            x_intercept: narrow((xc1 + xc2) / 2)?,
            y_num: narrow(ymt)?,
            y_den: narrow(ymd)?,
            y_intercept: narrow((yc1 + yc2) / 2)?,
        })
    }

    /// Map a raw reading to screen space, without clamping.
    pub fn apply(&self, raw: Point) -> Point {
        let axis = |v: i32, num: i32, den: i32, intercept: i32| -> i32 {
            let scaled = i64::from(v) * i64::from(num) / i64::from(den);
            (i64::from(intercept) + scaled).clamp(i64::from(i32::MIN), i64::from(i32::MAX)) as i32
        };
        Point::new(
            axis(raw.x, self.x_num, self.x_den, self.x_intercept),
            axis(raw.y, self.y_num, self.y_den, self.y_intercept),
        )
    }
}

/// An active calibration: samples, the screen they were taken on, and the
/// derived transform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TouchCalibration {
    points: CalibrationPoints,
    screen: ScreenGeometry,
    coefficients: Coefficients,
}

impl TouchCalibration {
    pub fn new(points: CalibrationPoints, screen: ScreenGeometry) -> Result<Self, CalibrationError> {
        let coefficients = Coefficients::compute(&points, screen)?;
        Ok(Self {
            points,
            screen,
            coefficients,
        })
    }

    /// Calibration of the reference panel.
    pub fn reference(screen: ScreenGeometry) -> Self {
        let points = CalibrationPoints::default();
        // The reference samples have non-zero extents on every edge.
        let coefficients = Coefficients::compute(&points, screen).unwrap_or(Coefficients::IDENTITY);
        Self {
            points,
            screen,
            coefficients,
        }
    }

    /// Raw reading to a pixel on screen, clamped to the display.
    pub fn map(&self, raw: Point) -> Point {
        let p = self.coefficients.apply(raw);
        Point::new(
            p.x.clamp(0, (self.screen.width - 1).max(0)),
            p.y.clamp(0, (self.screen.height - 1).max(0)),
        )
    }

    pub fn points(&self) -> &CalibrationPoints {
        &self.points
    }

    pub fn screen(&self) -> ScreenGeometry {
        self.screen
    }

    pub fn coefficients(&self) -> &Coefficients {
        &self.coefficients
    }

    /// Persist the samples this calibration was derived from.
    pub fn store(&self, path: &Path) -> Result<(), CalibrationError> {
        store(path, &self.points)
    }
}

// ============================================================================
// Persistence
// ============================================================================

/// Where a loaded calibration came from.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CalibrationSource {
    File,
    /// The file was missing or unusable; the reference calibration is active.
    Default,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LoadedCalibration {
    pub calibration: TouchCalibration,
    pub source: CalibrationSource,
}

impl LoadedCalibration {
    /// True when the user should be walked through a calibration gesture.
    pub fn needs_calibration(&self) -> bool {
        self.source == CalibrationSource::Default
    }
}

/// Text form: four `"<x> <y>"` lines, then the offset on its own line.
pub fn serialize(points: &CalibrationPoints) -> String {
    let mut out = String::new();
    for p in &points.points {
        out.push_str(&format!("{} {}\n", p.x, p.y));
    }
    out.push_str(&format!("{}\n", points.screen_offset));
    out
}

/// Parse the text form written by `serialize`. Tokens may be separated by
/// spaces, tabs or CR; anything after the offset line is ignored.
pub fn parse(content: &str) -> Result<CalibrationPoints, CalibrationError> {
    let mut lines = content.lines();
    let mut points = [Point::default(); SAMPLE_POINTS];

    for (i, point) in points.iter_mut().enumerate() {
        let line_no = i + 1;
        let line = lines.next().ok_or_else(|| CalibrationError::Parse {
            line: line_no,
            reason: "missing point".to_string(),
        })?;
        let mut tokens = line.split_whitespace();
        let x = parse_int(tokens.next(), line_no, "x")?;
        let y = parse_int(tokens.next(), line_no, "y")?;
        *point = Point::new(x, y);
    }

    let line_no = SAMPLE_POINTS + 1;
    let line = lines.next().ok_or_else(|| CalibrationError::Parse {
        line: line_no,
        reason: "missing screen offset".to_string(),
    })?;
    let screen_offset = parse_int(line.split_whitespace().next(), line_no, "screen offset")?;

    Ok(CalibrationPoints { points, screen_offset })
}

fn parse_int(token: Option<&str>, line: usize, what: &str) -> Result<i32, CalibrationError> {
    let token = token.ok_or_else(|| CalibrationError::Parse {
        line,
        reason: format!("missing {}", what),
    })?;
    token.parse::<i32>().map_err(|e| CalibrationError::Parse {
        line,
        reason: format!("bad {} '{}': {}", what, token, e),
    })
}

pub fn store(path: &Path, points: &CalibrationPoints) -> Result<(), CalibrationError> {
    std::fs::write(path, serialize(points)).map_err(CalibrationError::Os)?;
    tlog!("[touch] Stored calibration to {}", path.display());
    Ok(())
}

/// Read `path` and recompute the transform for `screen`.
pub fn load(path: &Path, screen: ScreenGeometry) -> Result<TouchCalibration, CalibrationError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            CalibrationError::NotFound(path.display().to_string())
        } else {
            CalibrationError::Os(e)
        }
    })?;
    let points = parse(&content)?;
    TouchCalibration::new(points, screen)
}

/// `load`, falling back to the reference calibration on any failure.
pub fn load_or_default(path: &Path, screen: ScreenGeometry) -> LoadedCalibration {
    match load(path, screen) {
        Ok(calibration) => LoadedCalibration {
            calibration,
            source: CalibrationSource::File,
        },
        Err(e) => {
            tlog!("[touch] {}; loading default calibration", e);
            LoadedCalibration {
                calibration: TouchCalibration::reference(screen),
                source: CalibrationSource::Default,
            }
        }
    }
}

/// Derive a calibration from a fresh gesture and persist it.
pub fn calibrate(points: CalibrationPoints, screen: ScreenGeometry, path: &Path) -> Result<TouchCalibration, CalibrationError> {
    let calibration = TouchCalibration::new(points, screen)?;
    let c = calibration.coefficients();
    tlog!(
        "[touch] xmt:{} ymt:{}, xmd:{}, ymd:{}, xc:{}, yc:{}",
        c.x_num,
        c.y_num,
        c.x_den,
        c.y_den,
        c.x_intercept,
        c.y_intercept
    );
    calibration.store(path)?;
    Ok(calibration)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn reference_coefficients() -> Coefficients {
        Coefficients {
            x_num: 740,
            x_den: 751,
            x_intercept: -114,
            y_num: 420,
            y_den: -637,
            y_intercept: 582,
        }
    }

    #[test]
    fn test_compute_reference_panel() {
        let coeffs = Coefficients::compute(&CalibrationPoints::default(), ScreenGeometry::default()).unwrap();
        assert_eq!(coeffs, reference_coefficients());
    }

    #[test]
    fn test_map_lands_near_targets() {
        let cal = TouchCalibration::reference(ScreenGeometry::default());
        let targets = cal.points().screen_targets(cal.screen());
        for (raw, target) in DEFAULT_POINTS.iter().zip(targets.iter()) {
            let mapped = cal.map(*raw);
            assert!((mapped.x - target.x).abs() <= 5, "{:?} -> {:?}, want {:?}", raw, mapped, target);
            assert!((mapped.y - target.y).abs() <= 10, "{:?} -> {:?}, want {:?}", raw, mapped, target);
        }
    }

    #[test]
    fn test_map_clamps_to_screen() {
        let cal = TouchCalibration::reference(ScreenGeometry::default());
        assert_eq!(cal.map(Point::new(0, 4000)), Point::new(0, 0));
        assert_eq!(cal.map(Point::new(4000, 0)), Point::new(799, 479));
    }

    #[test]
    fn test_compute_rejects_degenerate_points() {
        let same = Point::new(500, 500);
        let cal = CalibrationPoints::new([same; SAMPLE_POINTS], 30);
        assert!(matches!(
            Coefficients::compute(&cal, ScreenGeometry::default()),
            Err(CalibrationError::Degenerate(_))
        ));

        // top edge collapsed, everything else fine
        let mut points = DEFAULT_POINTS;
        points[1].x = points[0].x;
        assert!(TouchCalibration::new(CalibrationPoints::new(points, 30), ScreenGeometry::default()).is_err());
    }

    #[test]
    fn test_screen_targets() {
        let cal = CalibrationPoints::default();
        assert_eq!(
            cal.screen_targets(ScreenGeometry::default()),
            [
                Point::new(30, 30),
                Point::new(769, 30),
                Point::new(769, 449),
                Point::new(30, 449)
            ]
        );
    }

    #[test]
    fn test_store_load_round_trip() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CALIBRATION_FILE);
        let points = CalibrationPoints::new(
            [
                Point::new(149, 825),
                Point::new(898, 852),
                Point::new(898, 210),
                Point::new(144, 193),
            ],
            30,
        );

        store(&path, &points).unwrap();
        assert_eq!(
            std::fs::read_to_string(&path).unwrap(),
            "149 825\n898 852\n898 210\n144 193\n30\n"
        );

        let loaded = load(&path, ScreenGeometry::default()).unwrap();
        assert_eq!(*loaded.points(), points);
        assert_eq!(
            *loaded.coefficients(),
            Coefficients::compute(&points, ScreenGeometry::default()).unwrap()
        );
    }

    #[test]
    fn test_parse_accepts_crlf() {
        let points = parse("1 2\r\n3 4\r\n5 6\r\n7 8\r\n30\r\n").unwrap();
        assert_eq!(points.points[3], Point::new(7, 8));
        assert_eq!(points.screen_offset, 30);
    }

    #[test]
    fn test_parse_errors() {
        assert!(matches!(parse("1 2\n3 4\n"), Err(CalibrationError::Parse { line: 3, .. })));
        assert!(matches!(parse("1 2\n3 x\n5 6\n7 8\n30\n"), Err(CalibrationError::Parse { line: 2, .. })));
        assert!(matches!(parse("1 2\n3 4\n5 6\n7 8\n"), Err(CalibrationError::Parse { line: 5, .. })));
    }

    #[test]
    fn test_load_missing_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("absent.dat");
        assert!(matches!(load(&path, ScreenGeometry::default()), Err(CalibrationError::NotFound(_))));

        let loaded = load_or_default(&path, ScreenGeometry::default());
        assert!(loaded.needs_calibration());
        assert_eq!(*loaded.calibration.coefficients(), reference_coefficients());
    }

    #[test]
    fn test_load_or_default_on_garbage() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CALIBRATION_FILE);
        std::fs::write(&path, "not a calibration\n").unwrap();
        let loaded = load_or_default(&path, ScreenGeometry::default());
        assert_eq!(loaded.source, CalibrationSource::Default);
    }

    #[test]
    fn test_calibrate_stores_and_reloads() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join(DEFAULT_CALIBRATION_FILE);
        let points = CalibrationPoints::new(
            [
                Point::new(100, 900),
                Point::new(900, 900),
                Point::new(900, 100),
                Point::new(100, 100),
            ],
            20,
        );
        let cal = calibrate(points, ScreenGeometry::default(), &path).unwrap();
        let loaded = load_or_default(&path, ScreenGeometry::default());
        assert_eq!(loaded.source, CalibrationSource::File);
        assert_eq!(loaded.calibration, cal);
    }
}
