//! NAL unit scanning, parameter-set extraction, and FLV packaging.
//!
//! H.264 video crosses this crate in two packagings:
//! - **Annex B**: start codes (0x000001 or 0x00000001) delimit NAL
//!   units. This is what the encoders emit.
//! - **AVCC**: 4-byte big-endian length prefixes before each NAL unit.
//!   This is what RTMP/FLV expects.
//!
//! The parameter extractor locates the SPS/PPS records in the encoder's
//! out-of-band blob; the classifier decides keyframe-ness from the first
//! record of an encoded frame.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// NAL unit types relevant for H.264.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    /// Non-IDR slice (P/B frame).
    NonIdrSlice = 1,
    /// IDR slice (keyframe).
    IdrSlice = 5,
    /// Supplemental Enhancement Information.
    Sei = 6,
    /// Sequence Parameter Set.
    Sps = 7,
    /// Picture Parameter Set.
    Pps = 8,
    /// Access Unit Delimiter.
    Aud = 9,
    /// Other/unknown NAL type.
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(byte: u8) -> Self {
        match byte & 0x1F {
            1 => NalUnitType::NonIdrSlice,
            5 => NalUnitType::IdrSlice,
            6 => NalUnitType::Sei,
            7 => NalUnitType::Sps,
            8 => NalUnitType::Pps,
            9 => NalUnitType::Aud,
            _ => NalUnitType::Other,
        }
    }
}

/// Whether an encoded frame can start a playback session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameKind {
    /// Self-contained (IDR, or led by parameter/SEI records).
    Key,
    /// Depends on prior frames.
    Delta,
}

/// SPS/PPS records extracted from an encoder's out-of-band blob.
///
/// A session can be opened with the SPS alone; the PPS is carried when
/// present.
#[derive(Debug, Clone)]
pub struct ParameterSet {
    /// Sequence parameter set, including its NAL header byte.
    pub sps: Bytes,
    /// Picture parameter set, if one followed the SPS.
    pub pps: Option<Bytes>,
}

/// Locate the next start code at or after `from`.
///
/// Returns `(index, length)` of the 3- or 4-byte code.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let len = data.len();
    let mut i = from;

    while i + 3 <= len {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if i + 4 <= len && data[i + 2] == 0 && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }

    None
}

/// Payload range `[start, end)` of the next framed record at or after
/// `from`, excluding its start code.
fn next_record(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let (idx, code_len) = find_start_code(data, from)?;
    let start = idx + code_len;
    let end = find_start_code(data, start).map_or(data.len(), |(next, _)| next);

    if start < end {
        Some((start, end))
    } else {
        // Trailing start code with nothing behind it.
        None
    }
}

/// Extract SPS (required) and PPS (optional) from an Annex-B blob.
///
/// Scans for the first SPS-tagged record; the PPS search starts at the
/// SPS's end and tolerates a truncated or empty remaining window.
/// Returns `None` when no SPS is present.
pub fn extract_parameter_sets(extradata: &[u8]) -> Option<ParameterSet> {
    let mut pos = 0;
    let sps_range = loop {
        let (start, end) = next_record(extradata, pos)?;
        if NalUnitType::from(extradata[start]) == NalUnitType::Sps {
            break (start, end);
        }
        pos = end;
    };

    let mut pps = None;
    let mut pos = sps_range.1;
    while let Some((start, end)) = next_record(extradata, pos) {
        if NalUnitType::from(extradata[start]) == NalUnitType::Pps {
            pps = Some(Bytes::copy_from_slice(&extradata[start..end]));
            break;
        }
        pos = end;
    }

    debug!(
        sps_len = sps_range.1 - sps_range.0,
        pps_len = pps.as_ref().map_or(0, |p| p.len()),
        "Extracted parameter sets"
    );

    Some(ParameterSet {
        sps: Bytes::copy_from_slice(&extradata[sps_range.0..sps_range.1]),
        pps,
    })
}

/// Classify an encoded frame by the type tag of its first record.
///
/// SPS, IDR, and SEI lead keyframe access units; everything else is a
/// delta frame. This inspects only the first record and does not
/// validate the rest of the payload.
pub fn classify_frame(data: &[u8]) -> FrameKind {
    match next_record(data, 0) {
        Some((start, _)) => match NalUnitType::from(data[start]) {
            NalUnitType::Sps | NalUnitType::IdrSlice | NalUnitType::Sei => FrameKind::Key,
            _ => FrameKind::Delta,
        },
        None => FrameKind::Delta,
    }
}

/// Remove the leading start code from an encoded frame, if present.
pub fn strip_start_code(data: &Bytes) -> Bytes {
    if data.len() >= 4 && data[..4] == [0, 0, 0, 1] {
        data.slice(4..)
    } else if data.len() >= 3 && data[..3] == [0, 0, 1] {
        data.slice(3..)
    } else {
        data.clone()
    }
}

/// Convert a start-code-stripped Annex-B payload to AVCC.
///
/// The payload's first unit has no start code (already stripped);
/// interior start codes separate any further units. Each unit gets a
/// 4-byte big-endian length prefix.
pub fn annex_b_to_avcc(payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + 8);
    let mut unit_start = 0;
    let mut pos = 0;

    while let Some((idx, code_len)) = find_start_code(payload, pos) {
        if idx > unit_start {
            let unit = &payload[unit_start..idx];
            buf.put_u32(unit.len() as u32);
            buf.put_slice(unit);
        }
        unit_start = idx + code_len;
        pos = unit_start;
    }

    if unit_start < payload.len() {
        let unit = &payload[unit_start..];
        buf.put_u32(unit.len() as u32);
        buf.put_slice(unit);
    }

    buf.freeze()
}

/// Build an AVC Decoder Configuration Record (ISO 14496-15).
///
/// This is the sequence header sent before any video frames over
/// RTMP/FLV. A missing PPS is encoded as zero picture-parameter-set
/// entries. Returns `None` when the SPS is too short to carry the
/// profile/level bytes.
pub fn build_avc_decoder_config(params: &ParameterSet) -> Option<Bytes> {
    let sps = &params.sps;
    if sps.len() < 4 {
        debug!("SPS too short: {} bytes", sps.len());
        return None;
    }

    let pps_len = params.pps.as_ref().map_or(0, |p| p.len());
    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps_len);

    // configurationVersion
    buf.put_u8(0x01);

    // AVCProfileIndication, profile_compatibility, AVCLevelIndication
    buf.put_u8(sps[1]);
    buf.put_u8(sps[2]);
    buf.put_u8(sps[3]);

    // lengthSizeMinusOne (0xFF = 4-byte NAL length prefix)
    buf.put_u8(0xFF);

    // numOfSequenceParameterSets (0xE1 = 1 SPS, upper 3 bits reserved)
    buf.put_u8(0xE1);
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);

    // numOfPictureParameterSets
    match &params.pps {
        Some(pps) => {
            buf.put_u8(0x01);
            buf.put_u16(pps.len() as u16);
            buf.put_slice(pps);
        }
        None => buf.put_u8(0x00),
    }

    Some(buf.freeze())
}

/// Build an FLV video tag payload for H.264 data.
///
/// Layout: frame type (4 bits) + codec id (4 bits), AVC packet type
/// (0 = sequence header, 1 = NALU), 3-byte composition time offset,
/// then the data.
pub fn build_flv_video_tag(
    data: &[u8],
    is_keyframe: bool,
    is_sequence_header: bool,
    composition_time: i32,
) -> Bytes {
    let mut buf = BytesMut::with_capacity(5 + data.len());

    // Frame Type: 1=keyframe, 2=inter frame; Codec ID: 7=AVC
    let frame_type = if is_keyframe { 0x10 } else { 0x20 };
    buf.put_u8(frame_type | 0x07);

    buf.put_u8(if is_sequence_header { 0x00 } else { 0x01 });

    let ct = composition_time as u32;
    buf.put_u8(((ct >> 16) & 0xFF) as u8);
    buf.put_u8(((ct >> 8) & 0xFF) as u8);
    buf.put_u8((ct & 0xFF) as u8);

    buf.put_slice(data);

    buf.freeze()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extract_sps_and_pps() {
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, // SPS
            0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80, // PPS
        ];
        let params = extract_parameter_sets(&data).unwrap();
        assert_eq!(params.sps.as_ref(), &[0x67, 0x42, 0x00, 0x1E]);
        assert_eq!(params.pps.unwrap().as_ref(), &[0x68, 0xCE, 0x3C, 0x80]);
    }

    #[test]
    fn extract_skips_records_between_sps_and_pps() {
        // SEI padding before the SPS and between SPS and PPS; the scan
        // must land on the exact ranges regardless.
        let data = [
            0x00, 0x00, 0x01, 0x06, 0x05, 0xFF, // SEI (ignored)
            0x00, 0x00, 0x00, 0x01, 0x67, 0x64, 0x00, 0x28, 0xAC, // SPS
            0x00, 0x00, 0x01, 0x06, 0x01, // SEI between
            0x00, 0x00, 0x00, 0x01, 0x68, 0xEE, 0x38, 0x80, // PPS
            0x00, 0x00, 0x01, 0x09, 0xF0, // trailing AUD
        ];
        let params = extract_parameter_sets(&data).unwrap();
        assert_eq!(params.sps.as_ref(), &[0x67, 0x64, 0x00, 0x28, 0xAC]);
        assert_eq!(params.pps.unwrap().as_ref(), &[0x68, 0xEE, 0x38, 0x80]);
    }

    #[test]
    fn extract_sps_only() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E];
        let params = extract_parameter_sets(&data).unwrap();
        assert_eq!(params.sps.as_ref(), &[0x67, 0x42, 0x00, 0x1E]);
        assert!(params.pps.is_none());
    }

    #[test]
    fn extract_tolerates_truncated_pps_window() {
        // The SPS consumes the remainder of the blob except a dangling
        // start code with no payload behind it.
        let data = [
            0x00, 0x00, 0x00, 0x01, 0x67, 0x42, 0x00, 0x1E, //
            0x00, 0x00, 0x01,
        ];
        let params = extract_parameter_sets(&data).unwrap();
        assert!(params.pps.is_none());
    }

    #[test]
    fn extract_without_sps_is_none() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, 0x3C, 0x80]; // PPS only
        assert!(extract_parameter_sets(&data).is_none());
        assert!(extract_parameter_sets(&[]).is_none());
    }

    #[test]
    fn classify_recognized_tags_as_key() {
        for tag in [0x67u8, 0x65, 0x06, 0x27] {
            let data = [0x00, 0x00, 0x00, 0x01, tag, 0xAA];
            assert_eq!(classify_frame(&data), FrameKind::Key, "tag {tag:#x}");
        }
    }

    #[test]
    fn classify_non_idr_as_delta() {
        let data = [0x00, 0x00, 0x00, 0x01, 0x41, 0x9A]; // non-IDR slice
        assert_eq!(classify_frame(&data), FrameKind::Delta);
        assert_eq!(classify_frame(&[]), FrameKind::Delta);
    }

    #[test]
    fn strip_start_codes() {
        let four = Bytes::from_static(&[0x00, 0x00, 0x00, 0x01, 0x65, 0x88]);
        assert_eq!(strip_start_code(&four).as_ref(), &[0x65, 0x88]);

        let three = Bytes::from_static(&[0x00, 0x00, 0x01, 0x65, 0x88]);
        assert_eq!(strip_start_code(&three).as_ref(), &[0x65, 0x88]);

        let bare = Bytes::from_static(&[0x65, 0x88]);
        assert_eq!(strip_start_code(&bare).as_ref(), &[0x65, 0x88]);
    }

    #[test]
    fn avcc_single_unit() {
        let avcc = annex_b_to_avcc(&[0x65, 0x88, 0x84]);
        assert_eq!(avcc.as_ref(), &[0x00, 0x00, 0x00, 0x03, 0x65, 0x88, 0x84]);
    }

    #[test]
    fn avcc_interior_start_codes() {
        // Stripped keyframe payload: SPS + PPS + IDR.
        let payload = [
            0x67, 0x42, 0x00, 0x1E, //
            0x00, 0x00, 0x00, 0x01, 0x68, 0xCE, //
            0x00, 0x00, 0x01, 0x65, 0x88,
        ];
        let avcc = annex_b_to_avcc(&payload);
        assert_eq!(
            avcc.as_ref(),
            &[
                0x00, 0x00, 0x00, 0x04, 0x67, 0x42, 0x00, 0x1E, //
                0x00, 0x00, 0x00, 0x02, 0x68, 0xCE, //
                0x00, 0x00, 0x00, 0x02, 0x65, 0x88,
            ]
        );
    }

    #[test]
    fn avc_decoder_config_with_pps() {
        let params = ParameterSet {
            sps: Bytes::from_static(&[0x67, 0x42, 0x00, 0x1E, 0xAB, 0xCD]),
            pps: Some(Bytes::from_static(&[0x68, 0xCE, 0x3C, 0x80])),
        };
        let config = build_avc_decoder_config(&params).unwrap();

        assert_eq!(config[0], 0x01); // configurationVersion
        assert_eq!(config[1], 0x42); // profile_idc
        assert_eq!(config[2], 0x00); // constraint flags
        assert_eq!(config[3], 0x1E); // level_idc
        assert_eq!(config[4], 0xFF); // lengthSizeMinusOne
        assert_eq!(config[5], 0xE1); // one SPS
        assert_eq!(u16::from_be_bytes([config[6], config[7]]), 6); // SPS length
        assert_eq!(config[14], 0x01); // one PPS
    }

    #[test]
    fn avc_decoder_config_without_pps() {
        let params = ParameterSet {
            sps: Bytes::from_static(&[0x67, 0x42, 0x00, 0x1E]),
            pps: None,
        };
        let config = build_avc_decoder_config(&params).unwrap();
        assert_eq!(*config.last().unwrap(), 0x00); // zero PPS entries
        assert_eq!(config.len(), 8 + 4 + 1); // fixed header + SPS + PPS count
    }

    #[test]
    fn avc_decoder_config_rejects_short_sps() {
        let params = ParameterSet {
            sps: Bytes::from_static(&[0x67, 0x42]),
            pps: None,
        };
        assert!(build_avc_decoder_config(&params).is_none());
    }

    #[test]
    fn flv_tag_keyframe() {
        let data = [0x65, 0x88, 0x84];
        let tag = build_flv_video_tag(&data, true, false, 0);

        assert_eq!(tag[0], 0x17); // keyframe + AVC
        assert_eq!(tag[1], 0x01); // AVC NALU
        assert_eq!(&tag[2..5], &[0, 0, 0]); // composition time
        assert_eq!(&tag[5..], &data);
    }

    #[test]
    fn flv_tag_sequence_header() {
        let tag = build_flv_video_tag(&[0x01, 0x42], true, true, 0);
        assert_eq!(tag[0], 0x17);
        assert_eq!(tag[1], 0x00); // sequence header
    }

    #[test]
    fn flv_tag_delta() {
        let tag = build_flv_video_tag(&[0x41], false, false, 0);
        assert_eq!(tag[0], 0x27); // inter frame + AVC
    }
}
