//! H.264 packaging for the wire.
//!
//! The encoder emits Annex B (start-code delimited NAL units). Video frames
//! travel as AVCC (4 byte length prefixes) without parameter sets; SPS and
//! PPS are sent once per encoder in a `VideoConfig` frame holding the AVC
//! decoder configuration record.

use bytes::{BufMut, Bytes, BytesMut};
use tracing::debug;

/// NAL unit types the uplink cares about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NalUnitType {
    NonIdrSlice = 1,
    IdrSlice = 5,
    Sei = 6,
    Sps = 7,
    Pps = 8,
    /// Access unit delimiter.
    Aud = 9,
    Other = 0,
}

impl From<u8> for NalUnitType {
    fn from(header: u8) -> Self {
        match header & 0x1F {
            1 => Self::NonIdrSlice,
            5 => Self::IdrSlice,
            6 => Self::Sei,
            7 => Self::Sps,
            8 => Self::Pps,
            9 => Self::Aud,
            _ => Self::Other,
        }
    }
}

/// One NAL unit, header byte included, start code stripped.
#[derive(Debug, Clone)]
pub struct NalUnit {
    pub nal_type: NalUnitType,
    pub data: Bytes,
}

impl NalUnit {
    fn is_stream_metadata(&self) -> bool {
        matches!(
            self.nal_type,
            NalUnitType::Sps | NalUnitType::Pps | NalUnitType::Aud
        )
    }
}

/// Position and length of the next 3 or 4 byte start code at or after `from`.
fn find_start_code(data: &[u8], from: usize) -> Option<(usize, usize)> {
    let mut i = from;
    while i + 3 <= data.len() {
        if data[i] == 0 && data[i + 1] == 0 {
            if data[i + 2] == 1 {
                return Some((i, 3));
            }
            if data[i + 2] == 0 && i + 4 <= data.len() && data[i + 3] == 1 {
                return Some((i, 4));
            }
        }
        i += 1;
    }
    None
}

/// Split an Annex B byte stream into NAL units.
pub fn parse_annex_b(data: &[u8]) -> Vec<NalUnit> {
    let mut nals = Vec::new();
    let mut next = find_start_code(data, 0);

    while let Some((pos, code_len)) = next {
        let start = pos + code_len;
        next = find_start_code(data, start);
        let end = next.map_or(data.len(), |(p, _)| p);

        if start < end {
            let nal = &data[start..end];
            nals.push(NalUnit {
                nal_type: NalUnitType::from(nal[0]),
                data: Bytes::copy_from_slice(nal),
            });
        }
    }

    nals
}

/// Prefix each NAL unit with its 4 byte big-endian length.
pub fn nals_to_avcc(nals: &[NalUnit]) -> Bytes {
    let total = nals.iter().map(|n| 4 + n.data.len()).sum();
    let mut buf = BytesMut::with_capacity(total);
    for nal in nals {
        buf.put_u32(nal.data.len() as u32);
        buf.put_slice(&nal.data);
    }
    buf.freeze()
}

/// The last SPS and PPS in the encoder headers.
pub fn extract_sps_pps(annex_b_headers: &[u8]) -> Option<(Bytes, Bytes)> {
    let mut sps = None;
    let mut pps = None;
    for nal in parse_annex_b(annex_b_headers) {
        match nal.nal_type {
            NalUnitType::Sps => sps = Some(nal.data),
            NalUnitType::Pps => pps = Some(nal.data),
            _ => {}
        }
    }
    Some((sps?, pps?))
}

/// AVC decoder configuration record (ISO 14496-15) with one SPS and one PPS
/// and 4 byte NAL lengths.
pub fn build_avc_decoder_config(sps: &[u8], pps: &[u8]) -> Option<Bytes> {
    if sps.len() < 4 {
        debug!(len = sps.len(), "SPS too short for a decoder config");
        return None;
    }

    let mut buf = BytesMut::with_capacity(11 + sps.len() + pps.len());
    buf.put_u8(0x01);
    // profile_idc, constraint flags, level_idc
    buf.put_slice(&sps[1..4]);
    // Reserved bits set, lengthSizeMinusOne = 3
    buf.put_u8(0xFF);
    // Reserved bits set, one SPS
    buf.put_u8(0xE1);
    buf.put_u16(sps.len() as u16);
    buf.put_slice(sps);
    buf.put_u8(0x01);
    buf.put_u16(pps.len() as u16);
    buf.put_slice(pps);

    Some(buf.freeze())
}

/// Drop SPS, PPS and access unit delimiters; the decoder gets parameter sets
/// from the configuration record.
pub fn filter_parameter_sets(nals: Vec<NalUnit>) -> Vec<NalUnit> {
    nals.into_iter().filter(|n| !n.is_stream_metadata()).collect()
}

/// Convert an encoded Annex B frame into a `Video` frame payload.
pub fn annex_b_to_avcc(data: &[u8]) -> Bytes {
    nals_to_avcc(&filter_parameter_sets(parse_annex_b(data)))
}

/// Build the `VideoConfig` payload from encoder headers.
pub fn decoder_config_from_headers(annex_b_headers: &[u8]) -> Option<Bytes> {
    let (sps, pps) = extract_sps_pps(annex_b_headers)?;
    build_avc_decoder_config(&sps, &pps)
}
