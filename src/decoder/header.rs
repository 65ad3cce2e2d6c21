//! Frame tag, key frame header and first partition headers.
//!
//! Everything here is parsed once per frame and is read-only afterwards.

use alloc::format;
use alloc::vec::Vec;

use byteorder_lite::{ByteOrder, LittleEndian};

use super::api::DecodingError;
use super::bit_reader::{BitReader, BoolDecoder};
use crate::slice_reader::SliceReader;
use crate::common::types::{
    Prob, TreeNode, AC_QUANT, COEFF_BANDS, COEFF_PROBS, COEFF_UPDATE_PROBS, DC_QUANT, MAX_SEGMENTS,
    NUM_BANDS, NUM_CTX, NUM_PROBAS, SEGMENT_TREE_NODE_DEFAULTS,
};

/// Frame tag plus the key frame start code and dimensions.
pub(crate) const FRAME_HEADER_SIZE: usize = 10;
const FRAME_TAG_SIZE: usize = 3;
const VP8_MAGIC: [u8; 3] = [0x9d, 0x01, 0x2a];

/// Basic properties of a VP8 frame, read from its uncompressed header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameInfo {
    /// Picture width in pixels.
    pub width: u16,
    /// Picture height in pixels.
    pub height: u16,
    /// Horizontal upscaling hint (2 bits), not applied by the decoder.
    pub x_scale: u8,
    /// Vertical upscaling hint (2 bits), not applied by the decoder.
    pub y_scale: u8,
    /// Whether this is a key frame. Only key frames carry dimensions.
    pub keyframe: bool,
    /// Bitstream version, 0 to 3.
    pub version: u8,
    /// Whether the frame is meant to be displayed.
    pub show_frame: bool,
    /// Length in bytes of the first partition.
    pub partition0_size: u32,
}

impl FrameInfo {
    /// Number of macroblock columns.
    #[must_use]
    pub fn mb_width(&self) -> usize {
        usize::from(self.width).div_ceil(16)
    }

    /// Number of macroblock rows.
    #[must_use]
    pub fn mb_height(&self) -> usize {
        usize::from(self.height).div_ceil(16)
    }

    /// Parses the frame tag and the key frame header from the first
    /// [`FRAME_HEADER_SIZE`] bytes.
    pub(crate) fn parse(data: &[u8]) -> Result<Self, DecodingError> {
        let mut r = SliceReader::new(data);
        let bits = r
            .read_u24_le()
            .ok_or_else(|| DecodingError::NotEnoughData("Truncated header.".into()))?;
        let keyframe = bits & 1 == 0;
        let version = ((bits >> 1) & 7) as u8;
        let show_frame = (bits >> 4) & 1 != 0;
        let partition0_size = bits >> 5;

        if version > 3 {
            return Err(DecodingError::UnsupportedVersion(version));
        }
        if !keyframe {
            return Err(DecodingError::NotKeyframe);
        }
        if !show_frame {
            return Err(DecodingError::UnsupportedFeature(
                "Frame not displayable.".into(),
            ));
        }
        if r.remaining() < FRAME_HEADER_SIZE - FRAME_TAG_SIZE {
            return Err(DecodingError::NotEnoughData(
                "cannot parse picture header".into(),
            ));
        }
        let mut magic = [0u8; 3];
        for b in &mut magic {
            *b = r.read_u8().unwrap_or_default();
        }
        if magic != VP8_MAGIC {
            return Err(DecodingError::Vp8MagicInvalid(magic));
        }
        let w = r.read_u16_le().unwrap_or_default();
        let h = r.read_u16_le().unwrap_or_default();
        let info = Self {
            width: w & 0x3fff,
            x_scale: (w >> 14) as u8,
            height: h & 0x3fff,
            y_scale: (h >> 14) as u8,
            keyframe,
            version,
            show_frame,
            partition0_size,
        };
        if info.width == 0 || info.height == 0 {
            return Err(DecodingError::BitstreamError(format!(
                "invalid dimensions {}x{}",
                info.width, info.height
            )));
        }
        Ok(info)
    }
}

/// Peeks at the frame header without decoding anything.
///
/// Returns `None` when `data` is too short or is not a VP8 frame. Inter
/// frames are reported with `keyframe == false` and zero dimensions.
#[must_use]
pub fn get_info(data: &[u8]) -> Option<FrameInfo> {
    match FrameInfo::parse(data) {
        Ok(info) => Some(info),
        Err(DecodingError::NotKeyframe) => {
            let bits = LittleEndian::read_u24(data);
            Some(FrameInfo {
                width: 0,
                height: 0,
                x_scale: 0,
                y_scale: 0,
                keyframe: false,
                version: ((bits >> 1) & 7) as u8,
                show_frame: (bits >> 4) & 1 != 0,
                partition0_size: bits >> 5,
            })
        }
        Err(_) => None,
    }
}

/// Section 9.3
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct SegmentHeader {
    pub(crate) use_segment: bool,
    pub(crate) update_map: bool,
    /// Segment values replace the frame values instead of adjusting them.
    pub(crate) absolute_delta: bool,
    pub(crate) quantizer: [i8; MAX_SEGMENTS],
    pub(crate) filter_strength: [i8; MAX_SEGMENTS],
}

impl Default for SegmentHeader {
    fn default() -> Self {
        Self {
            use_segment: false,
            update_map: false,
            absolute_delta: true,
            quantizer: [0; MAX_SEGMENTS],
            filter_strength: [0; MAX_SEGMENTS],
        }
    }
}

/// Section 9.6
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct FilterHeader {
    pub(crate) simple: bool,
    pub(crate) level: u8,
    pub(crate) sharpness: u8,
    pub(crate) use_lf_delta: bool,
    pub(crate) ref_lf_delta: [i32; 4],
    pub(crate) mode_lf_delta: [i32; 4],
}

/// Which in-loop filter a frame uses.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum FilterType {
    None,
    Simple,
    Complex,
}

impl FilterType {
    /// Rows above each macroblock row the filter may still modify.
    pub(crate) const fn extra_rows(self) -> usize {
        match self {
            FilterType::None => 0,
            FilterType::Simple => 2,
            FilterType::Complex => 8,
        }
    }
}

/// Dequantization factors of one segment, as `[dc, ac]` pairs.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct QuantMatrix {
    pub(crate) y1: [i32; 2],
    pub(crate) y2: [i32; 2],
    pub(crate) uv: [i32; 2],
    /// Unclamped chroma AC index, used to pick the dithering amplitude.
    pub(crate) uv_quant: i32,
    /// Dithering amplitude, set once the decode options are known.
    pub(crate) dither: i32,
}

/// Token probabilities of one block type, expanded from bands to positions.
///
/// Entry 16 is a sentinel for the look-ahead after the last coefficient.
pub(crate) type PositionProbas = [[[Prob; NUM_PROBAS]; NUM_CTX]; 16 + 1];

/// Probabilities read from the first partition.
#[derive(Clone, Debug)]
pub(crate) struct Proba {
    pub(crate) segment_nodes: [TreeNode; 3],
    pub(crate) coeffs: [PositionProbas; 4],
}

impl Default for Proba {
    fn default() -> Self {
        Self {
            segment_nodes: SEGMENT_TREE_NODE_DEFAULTS,
            coeffs: [[[[0; NUM_PROBAS]; NUM_CTX]; 17]; 4],
        }
    }
}

/// Everything the first partition says about the frame, before the
/// per-macroblock modes.
#[derive(Clone, Debug)]
pub(crate) struct FrameHeader {
    pub(crate) info: FrameInfo,
    pub(crate) segment: SegmentHeader,
    pub(crate) filter: FilterHeader,
    pub(crate) filter_type: FilterType,
    pub(crate) quant: [QuantMatrix; MAX_SEGMENTS],
    pub(crate) proba: Proba,
    pub(crate) skip_proba: Option<Prob>,
}

/// The parsed headers plus the bit readers positioned after them.
pub(crate) struct ParsedHeaders {
    pub(crate) header: FrameHeader,
    /// Reader over the rest of partition 0: the macroblock modes.
    pub(crate) modes: BitReader,
    pub(crate) partitions: Vec<BitReader>,
    /// Offset of the first coefficient partition.
    pub(crate) partitions_start: usize,
}

fn parse_segment_header(
    d: &mut BoolDecoder<'_>,
    proba: &mut Proba,
) -> Result<SegmentHeader, DecodingError> {
    let mut hdr = SegmentHeader {
        use_segment: d.get_flag(),
        ..SegmentHeader::default()
    };
    if hdr.use_segment {
        hdr.update_map = d.get_flag();
        if d.get_flag() {
            hdr.absolute_delta = d.get_flag();
            for q in &mut hdr.quantizer {
                *q = d.get_optional_signed(7) as i8;
            }
            for f in &mut hdr.filter_strength {
                *f = d.get_optional_signed(6) as i8;
            }
        }
        if hdr.update_map {
            for node in &mut proba.segment_nodes {
                node.prob = if d.get_flag() { d.get_value(8) as u8 } else { 255 };
            }
        }
    }
    if d.is_eof() {
        return Err(DecodingError::BitstreamError(
            "cannot parse segment header".into(),
        ));
    }
    Ok(hdr)
}

fn parse_filter_header(d: &mut BoolDecoder<'_>) -> Result<FilterHeader, DecodingError> {
    let mut hdr = FilterHeader {
        simple: d.get_flag(),
        level: d.get_value(6) as u8,
        sharpness: d.get_value(3) as u8,
        use_lf_delta: d.get_flag(),
        ..FilterHeader::default()
    };
    if hdr.use_lf_delta && d.get_flag() {
        for delta in &mut hdr.ref_lf_delta {
            *delta = d.get_optional_signed(6);
        }
        for delta in &mut hdr.mode_lf_delta {
            *delta = d.get_optional_signed(6);
        }
    }
    if d.is_eof() {
        return Err(DecodingError::BitstreamError(
            "cannot parse filter header".into(),
        ));
    }
    Ok(hdr)
}

/// Splits `data[start..]` into coefficient partitions.
///
/// Sizes beyond the available data are clamped, so the readers are valid
/// even for truncated input. Returns whether the last partition starts
/// inside the data.
fn parse_partitions(
    d: &mut BoolDecoder<'_>,
    data: &[u8],
    start: usize,
) -> Result<(Vec<BitReader>, bool), DecodingError> {
    let num_parts = 1usize << d.get_value(2);
    let last_part = num_parts - 1;
    let buf_end = data.len();
    let mut size_left = buf_end.saturating_sub(start);
    if size_left < 3 * last_part {
        // the partition size table itself is incomplete
        return Err(DecodingError::NotEnoughData(
            "cannot parse partitions".into(),
        ));
    }
    let mut part_start = start + 3 * last_part;
    size_left -= 3 * last_part;

    let mut partitions = Vec::with_capacity(num_parts);
    for sz in data[start..start + 3 * last_part].chunks_exact(3) {
        let psize = (LittleEndian::read_u24(sz) as usize).min(size_left);
        partitions.push(BitReader::new(part_start, part_start + psize));
        part_start += psize;
        size_left -= psize;
    }
    partitions.push(BitReader::new(part_start, buf_end));
    Ok((partitions, part_start < buf_end))
}

fn parse_quant(d: &mut BoolDecoder<'_>, hdr: &SegmentHeader) -> [QuantMatrix; MAX_SEGMENTS] {
    fn dc_quant(index: i32) -> i32 {
        i32::from(DC_QUANT[index.clamp(0, 127) as usize])
    }

    fn ac_quant(index: i32) -> i32 {
        i32::from(AC_QUANT[index.clamp(0, 127) as usize])
    }

    let base_q0 = d.get_value(7) as i32;
    let dqy1_dc = d.get_optional_signed(4);
    let dqy2_dc = d.get_optional_signed(4);
    let dqy2_ac = d.get_optional_signed(4);
    let dquv_dc = d.get_optional_signed(4);
    let dquv_ac = d.get_optional_signed(4);

    let mut quant = [QuantMatrix::default(); MAX_SEGMENTS];
    for (i, m) in quant.iter_mut().enumerate() {
        let q = if hdr.use_segment {
            let q = i32::from(hdr.quantizer[i]);
            if hdr.absolute_delta {
                q
            } else {
                q + base_q0
            }
        } else {
            base_q0
        };
        m.y1 = [dc_quant(q + dqy1_dc), ac_quant(q)];
        // The intermediate result (max`284*155`) can be larger than the `i16` range.
        m.y2 = [dc_quant(q + dqy2_dc) * 2, (ac_quant(q + dqy2_ac) * 155 / 100).max(8)];
        // the chroma DC factor is capped at 132
        m.uv = [dc_quant((q + dquv_dc).min(117)), ac_quant(q + dquv_ac)];
        m.uv_quant = q + dquv_ac;
    }
    quant
}

fn parse_proba(d: &mut BoolDecoder<'_>, proba: &mut Proba) -> Option<Prob> {
    let mut bands = [[[[0u8; NUM_PROBAS]; NUM_CTX]; NUM_BANDS]; 4];
    for (t, planes) in bands.iter_mut().enumerate() {
        for (b, band) in planes.iter_mut().enumerate() {
            for (c, ctx) in band.iter_mut().enumerate() {
                for (p, prob) in ctx.iter_mut().enumerate() {
                    *prob = if d.get_bit(COEFF_UPDATE_PROBS[t][b][c][p]) {
                        d.get_value(8) as u8
                    } else {
                        COEFF_PROBS[t][b][c][p]
                    };
                }
            }
        }
    }
    for (positions, planes) in proba.coeffs.iter_mut().zip(&bands) {
        for (pos, slot) in positions.iter_mut().enumerate() {
            *slot = planes[usize::from(COEFF_BANDS[pos])];
        }
    }
    if d.get_flag() {
        Some(d.get_value(8) as u8)
    } else {
        None
    }
}

/// Parses every header up to the first macroblock.
///
/// `data` starts at the frame tag. Fails with `NotEnoughData` when the
/// first partition or the partition table is not complete yet, and when
/// the last coefficient partition has no data at all.
pub(crate) fn parse_headers(data: &[u8]) -> Result<ParsedHeaders, DecodingError> {
    let info = FrameInfo::parse(data)?;
    let p0_end = FRAME_HEADER_SIZE + info.partition0_size as usize;
    if p0_end > data.len() {
        return Err(DecodingError::NotEnoughData("bad partition length".into()));
    }

    let mut modes = BitReader::new(FRAME_HEADER_SIZE, p0_end);
    let mut d = modes.attach(data);

    let color_space = d.get_value(1) as u8;
    // clamping type, always applied
    let _ = d.get_value(1);
    if color_space != 0 {
        return Err(DecodingError::ColorSpaceInvalid(color_space));
    }

    let mut proba = Proba::default();
    let segment = parse_segment_header(&mut d, &mut proba)?;
    let filter = parse_filter_header(&mut d)?;
    let (partitions, complete) = parse_partitions(&mut d, data, p0_end)?;
    if !complete {
        return Err(DecodingError::NotEnoughData(
            "cannot parse partitions".into(),
        ));
    }
    let quant = parse_quant(&mut d, &segment);
    // refresh entropy probs, meaningless for a lone key frame
    let _ = d.get_flag();
    let skip_proba = parse_proba(&mut d, &mut proba);

    let filter_type = if filter.level == 0 {
        FilterType::None
    } else if filter.simple {
        FilterType::Simple
    } else {
        FilterType::Complex
    };

    log::debug!(
        "vp8 frame {}x{}: {} partition(s), filter {:?} level {}, segments {}",
        info.width,
        info.height,
        partitions.len(),
        filter_type,
        filter.level,
        segment.use_segment
    );

    Ok(ParsedHeaders {
        header: FrameHeader {
            info,
            segment,
            filter,
            filter_type,
            quant,
            proba,
            skip_proba,
        },
        modes,
        partitions_start: p0_end + 3 * (partitions.len() - 1),
        partitions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::test_stream::{FrameSpec, SegmentSpec};

    #[test]
    fn test_frame_info() {
        let data = FrameSpec::new(33, 17).encode();
        let info = FrameInfo::parse(&data).unwrap();
        assert_eq!((info.width, info.height), (33, 17));
        assert_eq!((info.mb_width(), info.mb_height()), (3, 2));
        assert!(info.keyframe && info.show_frame);
        assert_eq!(get_info(&data), Some(info));
    }

    #[test]
    fn test_frame_info_errors() {
        let data = FrameSpec::new(16, 16).encode();
        assert!(matches!(
            FrameInfo::parse(&data[..9]),
            Err(DecodingError::NotEnoughData(_))
        ));

        let mut bad = data.clone();
        bad[4] = 0x02;
        assert_eq!(
            FrameInfo::parse(&bad),
            Err(DecodingError::Vp8MagicInvalid([0x9d, 0x02, 0x2a]))
        );

        let mut inter = data.clone();
        inter[0] |= 1;
        assert_eq!(FrameInfo::parse(&inter), Err(DecodingError::NotKeyframe));
        let info = get_info(&inter).unwrap();
        assert!(!info.keyframe);
        assert_eq!(info.width, 0);

        let mut spec = FrameSpec::new(16, 16);
        spec.version = 3;
        assert!(FrameInfo::parse(&spec.encode()).is_ok());
        spec.show_frame = false;
        assert!(matches!(
            FrameInfo::parse(&spec.encode()),
            Err(DecodingError::UnsupportedFeature(_))
        ));

        let mut zero = data;
        zero[6] = 0;
        zero[7] = 0;
        assert!(matches!(
            FrameInfo::parse(&zero),
            Err(DecodingError::BitstreamError(_))
        ));
    }

    #[test]
    fn test_version_above_three() {
        let mut data = FrameSpec::new(16, 16).encode();
        data[0] |= 7 << 1;
        assert_eq!(
            FrameInfo::parse(&data),
            Err(DecodingError::UnsupportedVersion(7))
        );
    }

    #[test]
    fn test_headers_round_trip() {
        let mut spec = FrameSpec::new(64, 48);
        spec.filter_level = 20;
        spec.sharpness = 3;
        spec.lf_deltas = Some(([2, 0, -2, -2], [4, -2, 2, 4]));
        spec.log2_partitions = 2;
        spec.skip_prob = Some(200);
        spec.segments = Some(SegmentSpec {
            update_map: true,
            absolute: false,
            quantizer: [0, -10, 12, 30],
            filter_strength: [0, 5, -5, 10],
            tree_probs: [100, 255, 30],
        });
        spec.prob_updates.push((1, 2, 0, 3, 77));
        let data = spec.encode();
        let parsed = parse_headers(&data).unwrap();
        let hdr = &parsed.header;
        assert_eq!(hdr.filter_type, FilterType::Complex);
        assert_eq!(hdr.filter.sharpness, 3);
        assert_eq!(hdr.filter.ref_lf_delta, [2, 0, -2, -2]);
        assert_eq!(hdr.filter.mode_lf_delta, [4, -2, 2, 4]);
        assert!(hdr.segment.use_segment && hdr.segment.update_map);
        assert!(!hdr.segment.absolute_delta);
        assert_eq!(hdr.segment.quantizer, [0, -10, 12, 30]);
        assert_eq!(hdr.segment.filter_strength, [0, 5, -5, 10]);
        assert_eq!(hdr.proba.segment_nodes.map(|n| n.prob), [100, 255, 30]);
        assert_eq!(hdr.skip_proba, Some(200));
        assert_eq!(parsed.partitions.len(), 4);
        // band 2 covers position 2 only
        assert_eq!(hdr.proba.coeffs[1][2][0][3], 77);
        assert_eq!(hdr.proba.coeffs[1][16], hdr.proba.coeffs[1][0]);
        assert_eq!(hdr.quant[1].y1[1], i32::from(AC_QUANT[30]));
        assert_eq!(hdr.quant[3].uv_quant, 70);

        let (first, parts) = spec.encode_partitions();
        let mut start = FRAME_HEADER_SIZE + first.len() + 9;
        assert_eq!(parsed.partitions_start, start);
        for (br, part) in parsed.partitions.iter().zip(&parts) {
            assert_eq!(br.pos(), start);
            assert_eq!(br.end(), start + part.len());
            start += part.len();
        }
    }

    #[test]
    fn test_quant_clamps() {
        let mut spec = FrameSpec::new(16, 16);
        spec.base_q = 127;
        spec.q_deltas = [15, 15, 15, 15, 15];
        let parsed = parse_headers(&spec.encode()).unwrap();
        let q = parsed.header.quant[0];
        assert_eq!(q.y1, [i32::from(DC_QUANT[127]), i32::from(AC_QUANT[127])]);
        assert_eq!(q.uv[0], 132);
        assert_eq!(q.y2[1], i32::from(AC_QUANT[127]) * 155 / 100);
        assert_eq!(q.uv_quant, 142);

        spec.base_q = 0;
        spec.q_deltas = [0; 5];
        let parsed = parse_headers(&spec.encode()).unwrap();
        assert_eq!(parsed.header.quant[0].y2[1], 8);
        assert_eq!(parsed.header.filter_type, FilterType::None);
    }

    #[test]
    fn test_truncated_partitions() {
        let mut spec = FrameSpec::new(32, 32);
        spec.log2_partitions = 1;
        let data = spec.encode();
        let (first, parts) = spec.encode_partitions();
        let p0_end = FRAME_HEADER_SIZE + first.len();

        assert!(matches!(
            parse_headers(&data[..p0_end - 1]),
            Err(DecodingError::NotEnoughData(_))
        ));
        // size table incomplete
        assert!(parse_headers(&data[..p0_end + 2]).is_err());
        // first partition cut short: the last one has not started
        assert!(parse_headers(&data[..p0_end + 3 + parts[0].len()]).is_err());
        // one byte of the last partition is enough
        let parsed = parse_headers(&data[..p0_end + 3 + parts[0].len() + 1]).unwrap();
        assert_eq!(parsed.partitions[1].remaining(), 1);
    }

    #[test]
    fn test_filter_extra_rows() {
        assert_eq!(FilterType::None.extra_rows(), 0);
        assert_eq!(FilterType::Simple.extra_rows(), 2);
        assert_eq!(FilterType::Complex.extra_rows(), 8);
    }
}
