use chrono::NaiveDateTime;
use dicom::core::Tag;
use dicom::object::{FileDicomObject, InMemDicomObject};
use dicom::pixeldata::{ConvertOptions, PixelDecoder, VoiLutOption};
use dicom_dictionary_std::tags;
use ndarray::{Array2, s};
use std::io::Cursor;
use thiserror::Error;

/// GE private tag holding the number of spatial locations per volume.
const LOCATIONS_IN_ACQUISITION: Tag = Tag(0x0021, 0x104F);

#[derive(Debug, Error)]
pub enum SliceError {
    #[error("DICOM error: {0}")]
    Read(#[from] dicom::object::ReadError),

    #[error("missing or invalid tag: {0}")]
    MissingTag(&'static str),

    #[error("pixel data error: {0}")]
    PixelData(String),
}

/// The (exam, series, acquisition) triple that uniquely identifies one
/// scanner run. Two slices belong to the same in-progress acquisition iff
/// their triples are equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AcquisitionId {
    pub exam: i32,
    pub series: i32,
    pub acquisition: i32,
}

/// One decoded 2D slice as fetched from the scanner.
///
/// `instance_number` reflects true spatiotemporal acquisition order (the
/// index is the same for interleaved or sequential acquisitions), which
/// file-arrival order does not; downstream assembly must order by it.
#[derive(Debug, Clone)]
pub struct DicomSlice {
    pub identity: AcquisitionId,
    pub instance_number: u32,
    /// Spatial locations per volume, from the GE private tag with
    /// ImagesInAcquisition as fallback. `None` when neither tag is usable.
    pub slices_per_volume: Option<u32>,
    pub patient_id: String,
    pub series_description: String,
    pub repetition_time_ms: f64,
    pub num_timepoints: u32,
    pub study_datetime: Option<NaiveDateTime>,
    /// In-plane (row, column) spacing in millimeters.
    pub pixel_spacing: Option<(f64, f64)>,
    pub slice_spacing: Option<f64>,
    /// ImagePositionPatient (x, y, z) of this slice.
    pub image_position: Option<[f64; 3]>,
    pub pixels: Array2<u16>,
}

impl DicomSlice {
    /// Decode a slice from raw file bytes as fetched from the scanner.
    pub fn decode(bytes: &[u8]) -> Result<Self, SliceError> {
        let data = strip_preamble(bytes);
        let object = dicom::object::from_reader(Cursor::new(data))?;
        Self::from_object(&object)
    }

    pub fn from_object(object: &FileDicomObject<InMemDicomObject>) -> Result<Self, SliceError> {
        let exam = string_tag(object, tags::STUDY_ID)
            .and_then(|id| id.parse().ok())
            .ok_or(SliceError::MissingTag("StudyID"))?;
        let series = object
            .element(tags::SERIES_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<i32>().ok())
            .ok_or(SliceError::MissingTag("SeriesNumber"))?;
        let acquisition = object
            .element(tags::ACQUISITION_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<i32>().ok())
            .ok_or(SliceError::MissingTag("AcquisitionNumber"))?;
        let instance_number = object
            .element(tags::INSTANCE_NUMBER)
            .ok()
            .and_then(|e| e.to_int::<u32>().ok())
            .ok_or(SliceError::MissingTag("InstanceNumber"))?;

        let slices_per_volume = object
            .element(LOCATIONS_IN_ACQUISITION)
            .ok()
            .and_then(|e| e.to_int::<i64>().ok())
            .or_else(|| {
                object
                    .element(tags::IMAGES_IN_ACQUISITION)
                    .ok()
                    .and_then(|e| e.to_int::<i64>().ok())
            })
            .filter(|&n| n > 0)
            .map(|n| n as u32);

        let pixel_spacing = object
            .element(tags::PIXEL_SPACING)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .and_then(|values| Some((*values.first()?, *values.get(1)?)));

        let slice_spacing = object
            .element(tags::SPACING_BETWEEN_SLICES)
            .ok()
            .and_then(|e| e.to_float64().ok())
            .or_else(|| {
                object
                    .element(tags::SLICE_THICKNESS)
                    .ok()
                    .and_then(|e| e.to_float64().ok())
            });

        let image_position = object
            .element(tags::IMAGE_POSITION_PATIENT)
            .ok()
            .and_then(|e| e.to_multi_float64().ok())
            .and_then(|values| Some([*values.first()?, *values.get(1)?, *values.get(2)?]));

        let study_datetime = parse_study_datetime(
            string_tag(object, tags::STUDY_DATE).as_deref(),
            string_tag(object, tags::STUDY_TIME).as_deref(),
        );

        Ok(Self {
            identity: AcquisitionId {
                exam,
                series,
                acquisition,
            },
            instance_number,
            slices_per_volume,
            patient_id: string_tag(object, tags::PATIENT_ID).unwrap_or_default(),
            series_description: string_tag(object, tags::SERIES_DESCRIPTION).unwrap_or_default(),
            repetition_time_ms: object
                .element(tags::REPETITION_TIME)
                .ok()
                .and_then(|e| e.to_float64().ok())
                .unwrap_or(0.0),
            num_timepoints: object
                .element(tags::NUMBER_OF_TEMPORAL_POSITIONS)
                .ok()
                .and_then(|e| e.to_int::<u32>().ok())
                .unwrap_or(1),
            study_datetime,
            pixel_spacing,
            slice_spacing,
            image_position,
            pixels: decode_pixels(object)?,
        })
    }
}

fn string_tag(object: &FileDicomObject<InMemDicomObject>, tag: Tag) -> Option<String> {
    object
        .element(tag)
        .ok()
        .and_then(|e| e.to_str().ok())
        .map(|s| s.trim().to_string())
}

fn decode_pixels(object: &FileDicomObject<InMemDicomObject>) -> Result<Array2<u16>, SliceError> {
    let pixel_data = object
        .decode_pixel_data()
        .map_err(|e| SliceError::PixelData(e.to_string()))?;
    let options = ConvertOptions::new().with_voi_lut(VoiLutOption::First);
    let array = pixel_data
        .to_ndarray_with_options::<u16>(&options)
        .map_err(|e| SliceError::PixelData(e.to_string()))?;
    Ok(array.slice_move(s![0, .., .., 0]))
}

/// The file bytes start with a 128-byte preamble followed by "DICM"; the
/// parser expects the stream to begin at the magic code.
fn strip_preamble(bytes: &[u8]) -> &[u8] {
    if bytes.len() > 132 && &bytes[128..132] == b"DICM" {
        &bytes[128..]
    } else {
        bytes
    }
}

/// Combine StudyDate ("YYYYMMDD") and StudyTime ("HHMMSS", possibly with a
/// fractional part) into a single datetime.
fn parse_study_datetime(date: Option<&str>, time: Option<&str>) -> Option<NaiveDateTime> {
    let date = date?;
    let time = time?;
    let whole_seconds: String = time.chars().take_while(|c| *c != '.').take(6).collect();
    NaiveDateTime::parse_from_str(&format!("{date}{whole_seconds}"), "%Y%m%d%H%M%S").ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{NaiveDate, NaiveTime};

    #[test]
    fn preamble_is_stripped_when_present() {
        let mut bytes = vec![0u8; 128];
        bytes.extend_from_slice(b"DICM");
        bytes.extend_from_slice(&[1, 2, 3]);
        assert_eq!(strip_preamble(&bytes)[..4], *b"DICM");
    }

    #[test]
    fn bytes_without_preamble_pass_through() {
        let bytes = b"DICMrest".to_vec();
        assert_eq!(strip_preamble(&bytes), bytes.as_slice());
    }

    #[test]
    fn study_datetime_combines_date_and_time() {
        let parsed = parse_study_datetime(Some("20140321"), Some("142359"));
        let expected = NaiveDate::from_ymd_opt(2014, 3, 21)
            .and_then(|d| NaiveTime::from_hms_opt(14, 23, 59).map(|t| d.and_time(t)));
        assert_eq!(parsed, expected);
    }

    #[test]
    fn study_datetime_ignores_fractional_seconds() {
        let parsed = parse_study_datetime(Some("20140321"), Some("142359.000000"));
        assert!(parsed.is_some());
    }

    #[test]
    fn study_datetime_requires_both_tags() {
        assert_eq!(parse_study_datetime(Some("20140321"), None), None);
        assert_eq!(parse_study_datetime(None, Some("142359")), None);
    }
}
