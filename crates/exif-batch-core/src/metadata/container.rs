use img_parts::jpeg::{markers, Jpeg, JpegSegment};
use img_parts::png::{Png, PngChunk};
use img_parts::{Bytes, ImageEXIF};

use crate::error::MetadataError;

const JPEG_SIGNATURE: &[u8] = &[0xFF, 0xD8];
const PNG_SIGNATURE: &[u8] = &[0x89, b'P', b'N', b'G', 0x0D, 0x0A, 0x1A, 0x0A];
const EXIF_PREFIX: &[u8] = b"Exif\0\0";
const CHUNK_EXIF: [u8; 4] = *b"eXIf";
const CHUNK_IDAT: [u8; 4] = *b"IDAT";

/// Largest payload a JPEG marker segment can carry (the length field counts itself).
const MAX_SEGMENT_CONTENTS: usize = u16::MAX as usize - 2;

fn is_exif_segment(segment: &JpegSegment) -> bool {
    segment.marker() == markers::APP1 && segment.contents().starts_with(EXIF_PREFIX)
}

/// Image container whose EXIF segment can be swapped without touching the
/// encoded image data.
pub(crate) enum Container {
    Jpeg(Jpeg),
    Png(Png),
}

impl Container {
    /// Detect the container by signature and split it into segments/chunks.
    pub(crate) fn parse(bytes: Bytes) -> Result<Self, MetadataError> {
        if bytes.starts_with(JPEG_SIGNATURE) {
            Ok(Container::Jpeg(Jpeg::from_bytes(bytes)?))
        } else if bytes.starts_with(PNG_SIGNATURE) {
            Ok(Container::Png(Png::from_bytes(bytes)?))
        } else {
            Err(MetadataError::malformed("not a JPEG or PNG stream"))
        }
    }

    pub(crate) fn kind(&self) -> &'static str {
        match self {
            Container::Jpeg(_) => "jpeg",
            Container::Png(_) => "png",
        }
    }

    /// Raw TIFF-structured EXIF payload, without the container's framing.
    pub(crate) fn exif(&self) -> Option<Bytes> {
        match self {
            Container::Jpeg(jpeg) => jpeg.exif(),
            Container::Png(png) => png.exif(),
        }
    }

    /// Replace the EXIF payload in place. A stream without one gets it right
    /// after SOI/APP0 (JPEG) or before the first IDAT (PNG). Every other
    /// segment or chunk keeps its position and bytes.
    pub(crate) fn replace_exif(&mut self, exif: Bytes) -> Result<(), MetadataError> {
        match self {
            Container::Jpeg(jpeg) => {
                let mut contents = Vec::with_capacity(EXIF_PREFIX.len() + exif.len());
                contents.extend_from_slice(EXIF_PREFIX);
                contents.extend_from_slice(&exif);
                if contents.len() > MAX_SEGMENT_CONTENTS {
                    return Err(MetadataError::malformed(format!(
                        "EXIF block of {} bytes does not fit in one APP1 segment",
                        exif.len()
                    )));
                }

                let segments = jpeg.segments_mut();
                let index = segments.iter().position(is_exif_segment).unwrap_or_else(|| {
                    usize::from(segments.first().map_or(false, |s| s.marker() == markers::APP0))
                });
                segments.retain(|s| !is_exif_segment(s));
                segments.insert(index, JpegSegment::new_with_contents(markers::APP1, Bytes::from(contents)));
            }
            Container::Png(png) => {
                let chunks = png.chunks_mut();
                let index = chunks
                    .iter()
                    .position(|c| c.kind() == CHUNK_EXIF)
                    .or_else(|| chunks.iter().position(|c| c.kind() == CHUNK_IDAT))
                    .unwrap_or(chunks.len().saturating_sub(1));
                chunks.retain(|c| c.kind() != CHUNK_EXIF);
                chunks.insert(index, PngChunk::new(CHUNK_EXIF, exif));
            }
        }
        Ok(())
    }

    pub(crate) fn encode(self) -> Bytes {
        match self {
            Container::Jpeg(jpeg) => jpeg.encoder().bytes(),
            Container::Png(png) => png.encoder().bytes(),
        }
    }
}
