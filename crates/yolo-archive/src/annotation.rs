//! YOLO label lines.

use std::path::Path;

use thiserror::Error;

/// Image extensions recognised inside dataset splits (compared case-insensitively).
pub const IMAGE_EXTENSIONS: [&str; 4] = ["jpg", "jpeg", "png", "bmp"];

pub fn is_image_path(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| IMAGE_EXTENSIONS.iter().any(|x| x.eq_ignore_ascii_case(e)))
        .unwrap_or(false)
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum LineError {
    #[error("expected 5 fields, found {0}")]
    FieldCount(usize),

    #[error("class index '{0}' is not an integer")]
    ClassIndexParse(String),

    #[error("class index {index} out of range for {num_classes} classes")]
    ClassIndexRange { index: i64, num_classes: usize },

    #[error("'{0}' is not a number")]
    GeometryParse(String),

    #[error("bounding box value {0} outside [0, 1]")]
    GeometryRange(f64),
}

/// `<class> <cx> <cy> <w> <h>`, geometry normalized to the image size.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnnotationRecord {
    pub class_index: u32,
    pub cx: f64,
    pub cy: f64,
    pub width: f64,
    pub height: f64,
}

impl AnnotationRecord {
    /// Parses one label line against a manifest declaring `num_classes` classes.
    pub fn parse(line: &str, num_classes: usize) -> Result<Self, LineError> {
        let fields: Vec<&str> = line.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(LineError::FieldCount(fields.len()));
        }

        let index: i64 = fields[0]
            .parse()
            .map_err(|_| LineError::ClassIndexParse(fields[0].to_string()))?;
        if index < 0 || index as u64 >= num_classes as u64 {
            return Err(LineError::ClassIndexRange { index, num_classes });
        }

        let mut geometry = [0f64; 4];
        for (slot, raw) in geometry.iter_mut().zip(&fields[1..]) {
            let v: f64 = raw
                .parse()
                .map_err(|_| LineError::GeometryParse(raw.to_string()))?;
            if !(0.0..=1.0).contains(&v) {
                return Err(LineError::GeometryRange(v));
            }
            *slot = v;
        }

        Ok(Self {
            class_index: index as u32,
            cx: geometry[0],
            cy: geometry[1],
            width: geometry[2],
            height: geometry[3],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_well_formed_line() {
        let r = AnnotationRecord::parse("1 0.5 0.25 1 0", 2).unwrap();
        assert_eq!(r.class_index, 1);
        assert_eq!(r.cy, 0.25);
        assert_eq!(r.height, 0.0);
    }

    #[test]
    fn rejects_width_out_of_bounds() {
        assert_eq!(
            AnnotationRecord::parse("0 0.5 0.5 1.5 1.0", 2),
            Err(LineError::GeometryRange(1.5))
        );
    }

    #[test]
    fn rejects_four_fields() {
        assert_eq!(AnnotationRecord::parse("0 0.5 0.5 1.0", 2), Err(LineError::FieldCount(4)));
    }

    #[test]
    fn rejects_class_out_of_range() {
        assert_eq!(
            AnnotationRecord::parse("2 0.5 0.5 0.5 0.5", 2),
            Err(LineError::ClassIndexRange { index: 2, num_classes: 2 })
        );
        assert!(matches!(
            AnnotationRecord::parse("-1 0.5 0.5 0.5 0.5", 2),
            Err(LineError::ClassIndexRange { index: -1, .. })
        ));
    }

    #[test]
    fn rejects_non_numeric_tokens() {
        assert!(matches!(
            AnnotationRecord::parse("car 0.5 0.5 0.5 0.5", 2),
            Err(LineError::ClassIndexParse(_))
        ));
        assert!(matches!(
            AnnotationRecord::parse("0 0.5 x 0.5 0.5", 2),
            Err(LineError::GeometryParse(_))
        ));
        assert!(matches!(
            AnnotationRecord::parse("0 NaN 0.5 0.5 0.5", 2),
            Err(LineError::GeometryRange(_))
        ));
    }

    #[test]
    fn image_extensions_case_insensitive() {
        assert!(is_image_path(Path::new("a/b/IMG_01.JPG")));
        assert!(is_image_path(Path::new("x.bmp")));
        assert!(!is_image_path(Path::new("x.txt")));
        assert!(!is_image_path(Path::new("noext")));
    }
}
