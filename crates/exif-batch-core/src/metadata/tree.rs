use std::collections::BTreeMap;
use std::io::Cursor;

use chrono::NaiveDateTime;
use exif::experimental::Writer;
use exif::{Context, Exif, Field, In, Tag, Value};
use tracing::warn;

use crate::date::format_exif_datetime;
use crate::error::MetadataError;

/// Tag namespace inside one IFD.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Group {
    /// Baseline TIFF tags of the IFD itself (DateTime, Make, Orientation, ...).
    Image,
    /// Capture settings sub-IFD (DateTimeOriginal, ExposureTime, ...).
    Exif,
    Gps,
    Interop,
}

impl Group {
    fn from_context(ctx: Context) -> Option<Self> {
        #[allow(unreachable_patterns)]
        match ctx {
            Context::Tiff => Some(Group::Image),
            Context::Exif => Some(Group::Exif),
            Context::Gps => Some(Group::Gps),
            Context::Interop => Some(Group::Interop),
            _ => None,
        }
    }

    fn context(self) -> Context {
        match self {
            Group::Image => Context::Tiff,
            Group::Exif => Context::Exif,
            Group::Gps => Context::Gps,
            Group::Interop => Context::Interop,
        }
    }
}

/// The three leaves a capture date is written to, all in the primary IFD.
const CAPTURE_DATE_LEAVES: [(Group, Tag); 3] = [
    (Group::Image, Tag::DateTime),
    (Group::Exif, Tag::DateTimeOriginal),
    (Group::Exif, Tag::DateTimeDigitized),
];

/// One image file directory: tag values keyed by group, plus the thumbnail
/// payload the IFD points at, if any.
#[derive(Clone, Debug, Default)]
pub struct Ifd {
    groups: BTreeMap<Group, BTreeMap<u16, Value>>,
    jpeg: Option<Vec<u8>>,
    strips: Option<Vec<Vec<u8>>>,
}

impl Ifd {
    pub fn group(&self, group: Group) -> Option<&BTreeMap<u16, Value>> {
        self.groups.get(&group)
    }

    pub fn jpeg(&self) -> Option<&[u8]> {
        self.jpeg.as_deref()
    }

    fn is_empty(&self) -> bool {
        self.groups.values().all(BTreeMap::is_empty) && self.jpeg.is_none() && self.strips.is_none()
    }
}

/// Typed view of an EXIF block.
///
/// Offsets and sub-IFD pointers are not stored: they are recomputed when the
/// tree is serialized, so only values survive a round trip.
#[derive(Clone, Debug, Default)]
pub struct MetadataTree {
    little_endian: bool,
    ifds: BTreeMap<u16, Ifd>,
}

impl MetadataTree {
    /// Parse a raw TIFF-structured EXIF payload.
    pub fn parse(raw: &[u8]) -> Result<Self, MetadataError> {
        let exif = exif::Reader::new().read_raw(raw.to_vec())?;
        Self::from_exif(&exif)
    }

    pub fn from_exif(exif: &Exif) -> Result<Self, MetadataError> {
        let mut tree = MetadataTree {
            little_endian: exif.little_endian(),
            ifds: BTreeMap::new(),
        };

        for field in exif.fields() {
            let ifd = tree.ifds.entry(field.ifd_num.0).or_default();
            match field.tag {
                Tag::ExifIFDPointer | Tag::GPSInfoIFDPointer | Tag::InteropIFDPointer => {}
                Tag::JPEGInterchangeFormat
                | Tag::JPEGInterchangeFormatLength
                | Tag::StripOffsets
                | Tag::StripByteCounts => {}
                Tag::TileOffsets | Tag::TileByteCounts => {
                    warn!(ifd = field.ifd_num.0, "dropping tiled image data from EXIF block");
                }
                tag => match Group::from_context(tag.context()) {
                    Some(group) => {
                        ifd.groups
                            .entry(group)
                            .or_default()
                            .insert(tag.number(), field.value.clone());
                    }
                    None => warn!(tag = %tag, "dropping EXIF field of unknown context"),
                },
            }
        }

        for (&num, ifd) in tree.ifds.iter_mut() {
            ifd.jpeg = read_jpeg(exif, In(num))?;
            ifd.strips = read_strips(exif, In(num))?;
        }

        Ok(tree)
    }

    pub fn little_endian(&self) -> bool {
        self.little_endian
    }

    pub fn ifd(&self, ifd_num: In) -> Option<&Ifd> {
        self.ifds.get(&ifd_num.0)
    }

    pub fn get(&self, tag: Tag, ifd_num: In) -> Option<&Value> {
        let group = Group::from_context(tag.context())?;
        self.ifd(ifd_num)?.group(group)?.get(&tag.number())
    }

    /// Number of stored values across all IFDs and groups.
    pub fn len(&self) -> usize {
        self.ifds
            .values()
            .flat_map(|ifd| ifd.groups.values())
            .map(BTreeMap::len)
            .sum()
    }

    pub fn is_empty(&self) -> bool {
        self.ifds.values().all(Ifd::is_empty)
    }

    /// Overwrite (or create) the three capture-date leaves. Every other
    /// value, group and IFD is left as it was.
    pub fn set_capture_date(&mut self, timestamp: &NaiveDateTime) {
        let stamp = format_exif_datetime(timestamp);
        let primary = self.ifds.entry(In::PRIMARY.0).or_default();
        for (group, tag) in CAPTURE_DATE_LEAVES {
            primary
                .groups
                .entry(group)
                .or_default()
                .insert(tag.number(), Value::Ascii(vec![stamp.clone().into_bytes()]));
        }
    }

    /// Serialize back to a TIFF-structured EXIF payload in the original byte order.
    pub fn to_tiff(&self) -> Result<Vec<u8>, MetadataError> {
        let fields: Vec<Field> = self
            .ifds
            .iter()
            .flat_map(|(&num, ifd)| {
                ifd.groups.iter().flat_map(move |(&group, values)| {
                    values.iter().map(move |(&number, value)| Field {
                        tag: Tag(group.context(), number),
                        ifd_num: In(num),
                        value: value.clone(),
                    })
                })
            })
            .collect();
        let strips: Vec<(In, Vec<&[u8]>)> = self
            .ifds
            .iter()
            .filter_map(|(&num, ifd)| {
                let strips = ifd.strips.as_ref()?;
                Some((In(num), strips.iter().map(Vec::as_slice).collect()))
            })
            .collect();

        let mut writer = Writer::new();
        for field in &fields {
            writer.push_field(field);
        }
        for (&num, ifd) in &self.ifds {
            if let Some(jpeg) = &ifd.jpeg {
                writer.set_jpeg(jpeg, In(num));
            }
        }
        for (ifd_num, data) in &strips {
            writer.set_strips(data, *ifd_num);
        }

        let mut buf = Cursor::new(Vec::new());
        writer.write(&mut buf, self.little_endian)?;
        Ok(buf.into_inner())
    }
}

fn read_uints(exif: &Exif, tag: Tag, ifd_num: In) -> Option<Vec<u32>> {
    let field = exif.get_field(tag, ifd_num)?;
    Some(field.value.iter_uint()?.collect())
}

fn slice_buf(buf: &[u8], offset: u32, len: u32) -> Result<&[u8], MetadataError> {
    let start = offset as usize;
    let end = start
        .checked_add(len as usize)
        .filter(|&end| end <= buf.len())
        .ok_or_else(|| {
            MetadataError::malformed(format!(
                "thumbnail data {}+{} lies outside the {}-byte EXIF block",
                offset,
                len,
                buf.len()
            ))
        })?;
    Ok(&buf[start..end])
}

fn read_jpeg(exif: &Exif, ifd_num: In) -> Result<Option<Vec<u8>>, MetadataError> {
    let offset = read_uints(exif, Tag::JPEGInterchangeFormat, ifd_num);
    let len = read_uints(exif, Tag::JPEGInterchangeFormatLength, ifd_num);
    match (offset.as_deref(), len.as_deref()) {
        (Some([offset, ..]), Some([len, ..])) => Ok(Some(slice_buf(exif.buf(), *offset, *len)?.to_vec())),
        _ => Ok(None),
    }
}

fn read_strips(exif: &Exif, ifd_num: In) -> Result<Option<Vec<Vec<u8>>>, MetadataError> {
    let (Some(offsets), Some(counts)) = (
        read_uints(exif, Tag::StripOffsets, ifd_num),
        read_uints(exif, Tag::StripByteCounts, ifd_num),
    ) else {
        return Ok(None);
    };
    if offsets.len() != counts.len() {
        return Err(MetadataError::malformed("strip offsets and byte counts disagree"));
    }

    offsets
        .iter()
        .zip(&counts)
        .map(|(&offset, &len)| slice_buf(exif.buf(), offset, len).map(<[u8]>::to_vec))
        .collect::<Result<Vec<_>, _>>()
        .map(Some)
}
