use crate::constellation::Modulation;
use crate::error::{ModemError, Result};

/// Immutable OFDM parameter set. Both endpoints of a session must be
/// configured with the same profile; nothing on the wire announces it.
#[derive(Debug)]
pub struct OfdmProfile {
    pub name: &'static str,
    /// Transform size, always a power of two.
    pub fft_size: usize,
    /// Cyclic-prefix length; must exceed the expected channel delay spread.
    pub cp_len: usize,
    /// First data/pilot subcarrier, inclusive. DC is never used.
    pub sub_start: usize,
    /// Last data/pilot subcarrier, inclusive, below Nyquist.
    pub sub_end: usize,
    /// Pilot subcarrier indices, ascending, inside the band.
    pub pilots: &'static [usize],
}

/// Wide band, short prefix. Best over a direct line connection.
pub static STANDARD: OfdmProfile = OfdmProfile {
    name: "standard",
    fft_size: 512,
    cp_len: 64,
    sub_start: 12,
    sub_end: 232,
    pilots: &[
        15, 29, 43, 57, 71, 85, 99, 113, 127, 141, 155, 169, 183, 197, 211, 225,
    ],
};

/// Narrower band, long prefix. Survives room echo on a speaker/mic path.
pub static ACOUSTIC: OfdmProfile = OfdmProfile {
    name: "acoustic",
    fft_size: 512,
    cp_len: 128,
    sub_start: 12,
    sub_end: 120,
    pilots: &[15, 29, 43, 57, 71, 85, 99, 113],
};

/// Narrowest band, longest prefix. For strongly reverberant rooms.
pub static NARROWBAND: OfdmProfile = OfdmProfile {
    name: "narrowband",
    fft_size: 512,
    cp_len: 160,
    sub_start: 12,
    sub_end: 64,
    pilots: &[15, 29, 43, 57],
};

impl OfdmProfile {
    pub fn by_name(name: &str) -> Result<&'static OfdmProfile> {
        match name {
            "standard" => Ok(&STANDARD),
            "acoustic" => Ok(&ACOUSTIC),
            "narrowband" => Ok(&NARROWBAND),
            other => Err(ModemError::InvalidConfig(format!(
                "unknown profile: {other}"
            ))),
        }
    }

    /// Samples in one OFDM symbol including the cyclic prefix.
    pub fn symbol_len(&self) -> usize {
        self.fft_size + self.cp_len
    }

    pub fn is_pilot(&self, subcarrier: usize) -> bool {
        self.pilots.contains(&subcarrier)
    }

    /// Number of in-band subcarriers carrying data (band minus pilots).
    pub fn data_subcarrier_count(&self) -> usize {
        (self.sub_end - self.sub_start + 1) - self.pilots.len()
    }

    /// Data bits carried by one OFDM symbol at the given modulation.
    pub fn bits_per_ofdm_symbol(&self, modulation: Modulation) -> usize {
        self.data_subcarrier_count() * modulation.bits_per_symbol()
    }

    /// Long-prefix profiles get wider silence padding and lower throughput
    /// budgeting on the send side.
    pub fn is_acoustic(&self) -> bool {
        self.cp_len >= 128
    }

    /// OFDM symbols needed to carry `payload_bytes` bytes at `repetition`
    /// copies per bit.
    pub fn symbols_for_payload(
        &self,
        payload_bytes: usize,
        modulation: Modulation,
        repetition: usize,
    ) -> usize {
        let total_bits = payload_bytes * 8 * repetition;
        let per_symbol = self.bits_per_ofdm_symbol(modulation);
        total_bits.div_ceil(per_symbol)
    }
}

/// User-facing modulation choice. Picks the profile, the constellation and
/// the bit-level repetition factor together.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModemMode {
    Qpsk,
    Qam16,
    BpskAcoustic,
    BpskRepeat,
    BpskNarrow,
}

impl ModemMode {
    pub fn profile(&self) -> &'static OfdmProfile {
        match self {
            ModemMode::Qpsk | ModemMode::Qam16 => &STANDARD,
            ModemMode::BpskAcoustic | ModemMode::BpskRepeat => &ACOUSTIC,
            ModemMode::BpskNarrow => &NARROWBAND,
        }
    }

    pub fn modulation(&self) -> Modulation {
        match self {
            ModemMode::Qpsk => Modulation::Qpsk,
            ModemMode::Qam16 => Modulation::Qam16,
            ModemMode::BpskAcoustic | ModemMode::BpskRepeat | ModemMode::BpskNarrow => {
                Modulation::Bpsk
            }
        }
    }

    pub fn repetition(&self) -> usize {
        match self {
            ModemMode::Qpsk | ModemMode::Qam16 | ModemMode::BpskAcoustic => 1,
            ModemMode::BpskRepeat | ModemMode::BpskNarrow => 3,
        }
    }

    /// File-chunk size for the streaming protocol, scaled to throughput.
    pub fn chunk_size(&self) -> usize {
        match self.modulation() {
            Modulation::Qam16 | Modulation::Qam64 => 4096,
            Modulation::Qpsk => 2048,
            Modulation::Bpsk => 512,
        }
    }
}
