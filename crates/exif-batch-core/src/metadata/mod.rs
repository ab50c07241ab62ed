mod container;
pub mod tree;

use chrono::NaiveDateTime;
use exif::{In, Tag, Value};
use img_parts::Bytes;
use tracing::debug;

use crate::date::parse_exif_datetime;
use crate::error::MetadataError;

use container::Container;
pub use tree::{Group, Ifd, MetadataTree};

/// Rewrite the capture date of one photo.
///
/// Returns a new JPEG/PNG stream whose EXIF segment carries `timestamp` in
/// DateTime, DateTimeOriginal and DateTimeDigitized. A photo without EXIF
/// gets a fresh segment holding just those three fields. All other segments
/// and the image data are copied unchanged.
pub fn rewrite(photo: Bytes, timestamp: &NaiveDateTime) -> Result<Bytes, MetadataError> {
    let mut container = Container::parse(photo)?;
    let mut tree = match container.exif() {
        Some(raw) => MetadataTree::parse(&raw)?,
        None => MetadataTree::default(),
    };

    tree.set_capture_date(timestamp);
    let raw = tree.to_tiff()?;
    debug!(container = container.kind(), exif_len = raw.len(), "rewrote capture date");

    container.replace_exif(Bytes::from(raw))?;
    Ok(container.encode())
}

/// Parse the EXIF segment of a photo. A photo without one yields an empty tree.
pub fn read_metadata(photo: Bytes) -> Result<MetadataTree, MetadataError> {
    match Container::parse(photo)?.exif() {
        Some(raw) => MetadataTree::parse(&raw),
        None => Ok(MetadataTree::default()),
    }
}

/// Current capture date of a photo, if it records one.
pub fn read_capture_date(photo: Bytes) -> Option<NaiveDateTime> {
    let tree = read_metadata(photo).ok()?;
    capture_date(&tree)
}

pub fn capture_date(tree: &MetadataTree) -> Option<NaiveDateTime> {
    [Tag::DateTimeOriginal, Tag::DateTimeDigitized, Tag::DateTime]
        .into_iter()
        .find_map(|tag| match tree.get(tag, In::PRIMARY)? {
            Value::Ascii(strings) => parse_exif_datetime(&String::from_utf8_lossy(strings.first()?)),
            _ => None,
        })
}


#[cfg(test)]
mod tests {
    use super::fixtures::*;
    use super::*;
    use chrono::NaiveDate;
    use img_parts::jpeg::Jpeg;
    use img_parts::png::Png;
    use img_parts::ImageEXIF;

    fn stamp() -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 1, 1).unwrap().and_hms_opt(10, 0, 1).unwrap()
    }

    fn read_exif(photo: &Bytes) -> exif::Exif {
        let jpeg = Jpeg::from_bytes(photo.clone()).unwrap();
        exif::Reader::new().read_raw(jpeg.exif().unwrap().to_vec()).unwrap()
    }

    fn ascii_field(exif: &exif::Exif, tag: Tag) -> Option<String> {
        match &exif.get_field(tag, In::PRIMARY)?.value {
            Value::Ascii(strings) => strings.first().map(|s| String::from_utf8_lossy(s).into_owned()),
            _ => None,
        }
    }

    #[test]
    fn test_rewrite_without_exif_creates_three_fields() {
        let out = rewrite(Bytes::from(minimal_jpeg()), &stamp()).unwrap();
        let exif = read_exif(&out);

        for tag in [Tag::DateTime, Tag::DateTimeOriginal, Tag::DateTimeDigitized] {
            assert_eq!(ascii_field(&exif, tag).as_deref(), Some("2024:01:01 10:00:01"), "{}", tag);
        }
        let others: Vec<_> = exif
            .fields()
            .filter(|f| f.tag != Tag::ExifIFDPointer)
            .filter(|f| ![Tag::DateTime, Tag::DateTimeOriginal, Tag::DateTimeDigitized].contains(&f.tag))
            .map(|f| f.tag)
            .collect();
        assert!(others.is_empty(), "unexpected fields: {:?}", others);
    }

    #[test]
    fn test_rewrite_preserves_other_fields() {
        let source = Bytes::from(camera_jpeg());
        let before = read_exif(&source);
        let out = rewrite(source, &stamp()).unwrap();
        let after = read_exif(&out);

        for tag in [Tag::Make, Tag::Model, Tag::Orientation, Tag::ExposureTime, Tag::GPSLatitudeRef, Tag::GPSLatitude] {
            let old = before.get_field(tag, In::PRIMARY).unwrap();
            let new = after.get_field(tag, In::PRIMARY).unwrap_or_else(|| panic!("{} lost", tag));
            assert_eq!(
                old.display_value().to_string(),
                new.display_value().to_string(),
                "{} changed",
                tag
            );
        }
        assert_eq!(ascii_field(&after, Tag::DateTime).as_deref(), Some("2024:01:01 10:00:01"));
        assert_eq!(ascii_field(&after, Tag::DateTimeOriginal).as_deref(), Some("2024:01:01 10:00:01"));
        assert_eq!(ascii_field(&after, Tag::DateTimeDigitized).as_deref(), Some("2024:01:01 10:00:01"));
        assert!(after.little_endian());

        let compression = after.get_field(Tag::Compression, In::THUMBNAIL).unwrap();
        assert_eq!(compression.value.get_uint(0), Some(6));
        let tree = MetadataTree::from_exif(&after).unwrap();
        assert_eq!(tree.ifd(In::THUMBNAIL).and_then(Ifd::jpeg), Some(THUMBNAIL));
    }

    #[test]
    fn test_rewrite_keeps_image_data() {
        let mut tail = scan_data();
        tail.extend_from_slice(&[0xFF, 0xD9]);
        for source in [minimal_jpeg(), camera_jpeg()] {
            let out = rewrite(Bytes::from(source), &stamp()).unwrap();
            assert!(out.starts_with(&[0xFF, 0xD8]));
            assert!(out.ends_with(&tail));
        }
        let out = rewrite(Bytes::from(minimal_jpeg()), &stamp()).unwrap();
        assert!(out.windows(5).any(|w| w == b"JFIF\0"));
    }

    fn segments(photo: &Bytes) -> Vec<(u8, Bytes)> {
        Jpeg::from_bytes(photo.clone())
            .unwrap()
            .segments()
            .iter()
            .map(|s| (s.marker(), s.contents().clone()))
            .collect()
    }

    fn markers(photo: &Bytes) -> Vec<u8> {
        segments(photo).into_iter().map(|(marker, _)| marker).collect()
    }

    #[test]
    fn test_rewrite_keeps_segment_layout() {
        let source = Bytes::from(camera_jpeg());
        let out = rewrite(source.clone(), &stamp()).unwrap();
        assert_eq!(markers(&source), vec![0xE1, 0xDB, 0xC0, 0xC4, 0xDA]);
        assert_eq!(markers(&out), markers(&source));

        let untouched = |photo: &Bytes| -> Vec<(u8, Bytes)> {
            segments(photo).into_iter().filter(|(marker, _)| *marker != 0xE1).collect()
        };
        assert_eq!(untouched(&out), untouched(&source));
    }

    #[test]
    fn test_rewrite_inserts_exif_after_jfif() {
        let source = Bytes::from(minimal_jpeg());
        let out = rewrite(source.clone(), &stamp()).unwrap();
        assert_eq!(markers(&source), vec![0xE0, 0xDB, 0xC0, 0xC4, 0xDA]);
        assert_eq!(markers(&out), vec![0xE0, 0xE1, 0xDB, 0xC0, 0xC4, 0xDA]);
        assert_eq!(segments(&out)[0], segments(&source)[0]);
    }

    #[test]
    fn test_rewrite_bare_jpeg() {
        let out = rewrite(Bytes::from(bare_jpeg()), &stamp()).unwrap();
        assert_eq!(markers(&out), vec![0xE1, 0xDA]);
        assert_eq!(read_capture_date(out), Some(stamp()));
    }

    #[test]
    fn test_rewrite_is_idempotent() {
        for source in [minimal_jpeg(), camera_jpeg()] {
            let once = rewrite(Bytes::from(source), &stamp()).unwrap();
            let twice = rewrite(once.clone(), &stamp()).unwrap();
            assert_eq!(once, twice);
        }
    }

    #[test]
    fn test_rewrite_replaces_previous_date() {
        let first = rewrite(Bytes::from(camera_jpeg()), &stamp()).unwrap();
        let later = NaiveDate::from_ymd_opt(2030, 12, 25).unwrap().and_hms_opt(8, 30, 0).unwrap();
        let second = rewrite(first, &later).unwrap();
        assert_eq!(read_capture_date(second), Some(later));
    }

    #[test]
    fn test_rewrite_png() {
        let out = rewrite(Bytes::from(minimal_png()), &stamp()).unwrap();
        assert!(out.starts_with(&[0x89, b'P', b'N', b'G']));
        let kinds: Vec<[u8; 4]> = Png::from_bytes(out.clone()).unwrap().chunks().iter().map(|c| c.kind()).collect();
        assert_eq!(kinds, vec![*b"IHDR", *b"eXIf", *b"IDAT", *b"IEND"]);
        assert_eq!(read_capture_date(out.clone()), Some(stamp()));
        assert_eq!(read_metadata(out).unwrap().len(), 3);
    }

    #[test]
    fn test_malformed_input() {
        let source = Bytes::from_static(b"definitely not a photo");
        let err = rewrite(source.clone(), &stamp()).unwrap_err();
        assert!(matches!(err, MetadataError::MalformedInput(_)));
        assert_eq!(&source[..], b"definitely not a photo");
    }

    #[test]
    fn test_malformed_exif_segment() {
        let broken = Bytes::from(jpeg_with(&[exif_segment(b"MM\0\x2a\xff\xff\xff\xff")]));

        let err = rewrite(broken, &stamp()).unwrap_err();
        assert!(matches!(err, MetadataError::MalformedInput(_)));
    }

    #[test]
    fn test_read_capture_date_priority() {
        let expected = NaiveDate::from_ymd_opt(2008, 5, 30).unwrap().and_hms_opt(15, 56, 1);
        assert_eq!(read_capture_date(Bytes::from(camera_jpeg())), expected);
        assert_eq!(read_capture_date(Bytes::from(minimal_jpeg())), None);
        assert_eq!(read_capture_date(Bytes::from_static(b"nope")), None);
    }
}
