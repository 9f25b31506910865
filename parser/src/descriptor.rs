use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::io::BufRead;

use crate::error::{syntax_error, ParseError, Result};

pub const EV_SYN: u16 = 0x00;
pub const EV_KEY: u16 = 0x01;
pub const EV_REL: u16 = 0x02;
pub const EV_ABS: u16 = 0x03;
pub const EV_MSC: u16 = 0x04;
pub const EV_SW: u16 = 0x05;
pub const EV_LED: u16 = 0x11;
pub const EV_SND: u16 = 0x12;
pub const EV_REP: u16 = 0x14;
pub const EV_FF: u16 = 0x15;
pub const EV_MAX: u16 = 0x1f;

pub const INPUT_PROP_MAX: u16 = 0x1f;

/// Highest code the kernel accepts for an event type. The `EV_SYN` mask of a description lists
/// the supported event types, so its range is that of the types themselves.
pub fn max_code(ev_type: u16) -> Option<u16> {
    let max = match ev_type {
        EV_SYN => EV_MAX,
        EV_KEY => 0x2ff,
        EV_REL => 0x0f,
        EV_ABS => 0x3f,
        EV_MSC => 0x07,
        EV_SW => 0x10,
        EV_LED => 0x0f,
        EV_SND => 0x07,
        EV_REP => 0x01,
        EV_FF => 0x7f,
        t if t <= EV_MAX => 0x01,
        _ => return None,
    };
    Some(max)
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InputId {
    pub bustype: u16,
    pub vendor: u16,
    pub product: u16,
    pub version: u16,
}

/// Calibration of one absolute axis, as found on an `A:` line.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AbsAxis {
    pub code: u16,
    pub minimum: i32,
    pub maximum: i32,
    pub fuzz: i32,
    pub flat: i32,
    pub resolution: i32,
}

/// A parsed device description: everything needed to register a virtual device that looks like
/// the recorded one.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Descriptor {
    name: String,
    id: InputId,
    properties: BTreeSet<u16>,
    codes: BTreeMap<u16, BTreeSet<u16>>,
    abs: BTreeMap<u16, AbsAxis>,
    switches: BTreeMap<u16, i32>,
}

/// Byte offsets of the bitmasks being filled. Masks longer than one line continue on the next
/// line with the same prefix (and event type for `B:`).
#[derive(Default)]
struct MaskOffsets {
    properties: usize,
    codes: HashMap<u16, usize>,
}

const HELP_I: &str = "expected `I: <bustype> <vendor> <product> <version>` in hexadecimal";
const HELP_B: &str = "expected `B: <type> <byte> ...` with hexadecimal values";
const HELP_P: &str = "expected `P: <byte> ...` with hexadecimal values";
const HELP_A: &str =
    "expected `A: <code> <min> <max> <fuzz> <flat> [<resolution>]`, code in hexadecimal";
const HELP_STATE: &str = "expected `<code> <value>`, code in hexadecimal";

impl Descriptor {
    /// Reads description lines up to the first `E:` line or the end of the stream.
    ///
    /// Comments (`#`) and blank lines are skipped. A stream without a single description line
    /// is rejected with [`ParseError::MissingDescription`].
    pub fn load<R: BufRead>(mut reader: R) -> Result<Self> {
        let mut desc = Descriptor::default();
        let mut offsets = MaskOffsets::default();
        let mut found = false;
        let mut buf = String::new();
        let mut line_no = 0;
        loop {
            buf.clear();
            if reader.read_line(&mut buf)? == 0 {
                break;
            }
            line_no += 1;
            let line = buf.trim();
            if line.starts_with("E:") {
                break;
            }
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            desc.apply_line(line, line_no, &mut offsets)?;
            found = true;
        }
        if !found {
            return Err(ParseError::MissingDescription);
        }
        log::debug!(
            "loaded description of {:?}: {} event types, {} absolute axes",
            desc.name,
            desc.codes(EV_SYN).count(),
            desc.abs.len()
        );
        Ok(desc)
    }

    pub fn parse(s: &str) -> Result<Self> {
        Self::load(s.as_bytes())
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: impl Into<String>) {
        self.name = name.into();
    }

    pub fn id(&self) -> InputId {
        self.id
    }

    pub fn properties(&self) -> impl Iterator<Item = u16> + '_ {
        self.properties.iter().copied()
    }

    /// Codes enabled for `ev_type`, in ascending order.
    pub fn codes(&self, ev_type: u16) -> impl Iterator<Item = u16> + '_ {
        self.codes.get(&ev_type).into_iter().flatten().copied()
    }

    pub fn has_code(&self, ev_type: u16, code: u16) -> bool {
        self.codes
            .get(&ev_type)
            .is_some_and(|codes| codes.contains(&code))
    }

    pub fn abs_info(&self, code: u16) -> Option<&AbsAxis> {
        self.abs.get(&code)
    }

    /// Recorded switch positions, from `S:` lines.
    pub fn switch_states(&self) -> impl Iterator<Item = (u16, i32)> + '_ {
        self.switches.iter().map(|(c, v)| (*c, *v))
    }

    fn apply_line(&mut self, line: &str, line_no: usize, offsets: &mut MaskOffsets) -> Result<()> {
        let Some((prefix, rest)) = line.split_once(':') else {
            return Err(syntax_error(
                line_no,
                format!("`{line}` has no line prefix"),
                "description lines start with one of N:, I:, P:, B:, A:, L: or S:",
            ));
        };
        let fields: Vec<&str> = rest.split_whitespace().collect();
        match prefix {
            "N" => self.name = rest.trim().to_owned(),
            "I" => {
                if fields.len() != 4 {
                    return Err(syntax_error(line_no, "wrong number of id fields", HELP_I));
                }
                self.id = InputId {
                    bustype: hex_u16(fields[0], line_no, HELP_I)?,
                    vendor: hex_u16(fields[1], line_no, HELP_I)?,
                    product: hex_u16(fields[2], line_no, HELP_I)?,
                    version: hex_u16(fields[3], line_no, HELP_I)?,
                };
            }
            "P" => {
                let bytes = hex_bytes(&fields, line_no, HELP_P)?;
                set_bits(
                    &mut self.properties,
                    offsets.properties,
                    &bytes,
                    INPUT_PROP_MAX,
                );
                offsets.properties += bytes.len();
            }
            "B" => {
                let Some((ev_type, mask)) = fields.split_first() else {
                    return Err(syntax_error(line_no, "missing event type", HELP_B));
                };
                let ev_type = hex_u16(ev_type, line_no, HELP_B)?;
                let Some(max) = max_code(ev_type) else {
                    return Err(syntax_error(
                        line_no,
                        format!("event type {ev_type:#04x} is out of range"),
                        HELP_B,
                    ));
                };
                let bytes = hex_bytes(mask, line_no, HELP_B)?;
                let offset = offsets.codes.entry(ev_type).or_default();
                set_bits(
                    self.codes.entry(ev_type).or_default(),
                    *offset,
                    &bytes,
                    max,
                );
                *offset += bytes.len();
            }
            "A" => {
                if !(5..=6).contains(&fields.len()) {
                    return Err(syntax_error(line_no, "wrong number of axis fields", HELP_A));
                }
                let code = hex_u16(fields[0], line_no, HELP_A)?;
                let resolution = match fields.get(5) {
                    Some(f) => dec_i32(f, line_no, HELP_A)?,
                    None => 0,
                };
                self.abs.insert(
                    code,
                    AbsAxis {
                        code,
                        minimum: dec_i32(fields[1], line_no, HELP_A)?,
                        maximum: dec_i32(fields[2], line_no, HELP_A)?,
                        fuzz: dec_i32(fields[3], line_no, HELP_A)?,
                        flat: dec_i32(fields[4], line_no, HELP_A)?,
                        resolution,
                    },
                );
            }
            "L" | "S" => {
                if fields.len() != 2 {
                    return Err(syntax_error(line_no, "wrong number of state fields", HELP_STATE));
                }
                let code = hex_u16(fields[0], line_no, HELP_STATE)?;
                let value = dec_i32(fields[1], line_no, HELP_STATE)?;
                if prefix == "L" {
                    // LEDs are set by whoever reads the device, not by the recording.
                    log::trace!("ignoring LED state {code:#x} = {value}");
                } else {
                    self.switches.insert(code, value);
                }
            }
            _ => {
                return Err(syntax_error(
                    line_no,
                    format!("unknown line prefix `{prefix}:`"),
                    "description lines start with one of N:, I:, P:, B:, A:, L: or S:",
                ))
            }
        }
        Ok(())
    }
}

fn set_bits(set: &mut BTreeSet<u16>, byte_offset: usize, bytes: &[u8], max: u16) {
    for (i, byte) in bytes.iter().enumerate() {
        for bit in 0..8 {
            if byte & (1 << bit) == 0 {
                continue;
            }
            let code = (byte_offset + i) * 8 + bit;
            match u16::try_from(code) {
                Ok(code) if code <= max => {
                    set.insert(code);
                }
                _ => log::debug!("dropping out of range code {code:#x} (max {max:#x})"),
            }
        }
    }
}

fn hex_bytes(fields: &[&str], line: usize, help: &str) -> Result<Vec<u8>> {
    fields
        .iter()
        .map(|f| {
            u8::from_str_radix(f, 16)
                .map_err(|_| syntax_error(line, format!("`{f}` is not a hexadecimal byte"), help))
        })
        .collect()
}

pub(crate) fn hex_u16(field: &str, line: usize, help: &str) -> Result<u16> {
    u16::from_str_radix(field, 16)
        .map_err(|_| syntax_error(line, format!("`{field}` is not a hexadecimal number"), help))
}

pub(crate) fn dec_i32(field: &str, line: usize, help: &str) -> Result<i32> {
    field
        .parse()
        .map_err(|_| syntax_error(line, format!("`{field}` is not a decimal number"), help))
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOUCHPAD: &str = "\
# EVEMU 1.3
# Input device name: \"SynPS/2 Synaptics TouchPad\"
N: SynPS/2 Synaptics TouchPad
I: 0011 0002 0007 01b1
P: 05 00 00 00 00 00 00 00
B: 00 0b 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 01 00 00 00 00 00
B: 03 03 00 00 01 00 80 60 06
A: 00 1472 5470 8 0 60
A: 01 1408 4498 8 0 85
A: 18 0 255 0 0 0
A: 2f 0 1 0 0
L: 00 1
S: 05 0
E: 0.000000 0003 0039 0314
";

    #[test]
    fn loads_a_touchpad_description() {
        let desc = Descriptor::parse(TOUCHPAD).unwrap();
        assert_eq!(desc.name(), "SynPS/2 Synaptics TouchPad");
        assert_eq!(
            desc.id(),
            InputId {
                bustype: 0x11,
                vendor: 0x2,
                product: 0x7,
                version: 0x1b1,
            }
        );
        assert_eq!(desc.properties().collect::<Vec<_>>(), vec![0, 2]);
        assert_eq!(
            desc.codes(EV_SYN).collect::<Vec<_>>(),
            vec![EV_SYN, EV_KEY, EV_ABS]
        );
        // Sixth EV_KEY line starts at byte 40, so its third byte holds codes 0x150..0x157.
        assert_eq!(desc.codes(EV_KEY).collect::<Vec<_>>(), vec![0x150]);
        assert!(desc.has_code(EV_ABS, 0x2f));
        assert!(desc.has_code(EV_ABS, 0x18));
        assert!(!desc.has_code(EV_REL, 0));

        let x = desc.abs_info(0).unwrap();
        assert_eq!((x.minimum, x.maximum, x.fuzz, x.resolution), (1472, 5470, 8, 60));
        assert_eq!(desc.abs_info(0x2f).unwrap().resolution, 0);
        assert_eq!(desc.switch_states().collect::<Vec<_>>(), vec![(5, 0)]);
    }

    #[test]
    fn stops_at_first_event_line() {
        let desc = Descriptor::parse("N: dev\nE: 0.000000 0000 0000 0\nN: other\n").unwrap();
        assert_eq!(desc.name(), "dev");
    }

    #[test]
    fn empty_name_is_kept_empty() {
        let desc = Descriptor::parse("N:\nB: 00 03\n").unwrap();
        assert_eq!(desc.name(), "");
    }

    #[test]
    fn events_only_stream_has_no_description() {
        let err = Descriptor::parse("# just events\nE: 0.000000 0001 001e 1\n").unwrap_err();
        assert!(matches!(err, ParseError::MissingDescription));
        let err = Descriptor::parse("").unwrap_err();
        assert!(matches!(err, ParseError::MissingDescription));
    }

    #[test]
    fn out_of_range_codes_are_dropped() {
        // REL_MAX is 0x0f, so only the first two bytes can carry codes.
        let desc = Descriptor::parse("N: mouse\nB: 02 03 80 01\n").unwrap();
        assert_eq!(desc.codes(EV_REL).collect::<Vec<_>>(), vec![0, 1, 0x0f]);
    }

    #[test]
    fn bad_lines_report_their_line_number() {
        let err = Descriptor::parse("N: x\nI: 0003 zz 0001 0001\n").unwrap_err();
        assert_eq!(err.line(), Some(2));

        let err = Descriptor::parse("N: x\n\nQ: 1\n").unwrap_err();
        assert_eq!(err.line(), Some(3));

        let err = Descriptor::parse("B: 40 01\n").unwrap_err();
        assert_eq!(err.line(), Some(1));

        let err = Descriptor::parse("A: 00 0 100\n").unwrap_err();
        assert_eq!(err.line(), Some(1));
    }
}
