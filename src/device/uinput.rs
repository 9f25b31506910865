//! Device registration through `/dev/uinput`.

use evdev::{
    uinput::{VirtualDevice, VirtualDeviceBuilder},
    AbsInfo, AbsoluteAxisType, AttributeSet, BusType, EventType, InputEvent, InputId, Key,
    MiscType, PropType, RelativeAxisType, SwitchType, UinputAbsSetup,
};
use evemu_parser::{AbsAxis, Descriptor, EV_ABS, EV_KEY, EV_MSC, EV_REL, EV_SW, EV_SYN};

use std::io;
use std::path::PathBuf;

use super::Registrar;

/// uinput names are at most 80 bytes including the terminating NUL.
pub const UINPUT_MAX_NAME_SIZE: usize = 80;

/// Event types whose capabilities are registered. LEDs, sounds and autorepeat are driven by the
/// host, and force feedback would need effect upload handling.
const REGISTERED_TYPES: [u16; 6] = [EV_SYN, EV_KEY, EV_REL, EV_ABS, EV_MSC, EV_SW];

/// What a description asks uinput to register, in evdev's types.
pub struct Capabilities {
    pub properties: AttributeSet<PropType>,
    pub keys: AttributeSet<Key>,
    pub relative_axes: AttributeSet<RelativeAxisType>,
    pub absolute_axes: Vec<AbsAxis>,
    pub misc: AttributeSet<MiscType>,
    pub switches: AttributeSet<SwitchType>,
    /// Switches that start out on. Sent once the device exists.
    pub initial_switches: Vec<(u16, i32)>,
    /// Event types present in the description but not registered.
    pub skipped_types: Vec<u16>,
}

impl Capabilities {
    pub fn from_descriptor(descriptor: &Descriptor) -> Self {
        let absolute_axes = descriptor
            .codes(EV_ABS)
            .map(|code| match descriptor.abs_info(code) {
                Some(axis) => *axis,
                None => AbsAxis {
                    code,
                    ..Default::default()
                },
            })
            .collect();
        let skipped_types: Vec<u16> = descriptor
            .codes(EV_SYN)
            .filter(|ev_type| !REGISTERED_TYPES.contains(ev_type))
            .collect();
        for ev_type in &skipped_types {
            log::debug!("skipping capabilities of event type {ev_type:#04x}");
        }
        Self {
            properties: descriptor.properties().map(PropType).collect(),
            keys: descriptor.codes(EV_KEY).map(Key::new).collect(),
            relative_axes: descriptor.codes(EV_REL).map(RelativeAxisType).collect(),
            absolute_axes,
            misc: descriptor.codes(EV_MSC).map(MiscType).collect(),
            switches: descriptor.codes(EV_SW).map(SwitchType).collect(),
            initial_switches: descriptor
                .switch_states()
                .filter(|&(code, value)| value != 0 && descriptor.has_code(EV_SW, code))
                .collect(),
            skipped_types,
        }
    }

    fn apply<'a>(
        &self,
        mut builder: VirtualDeviceBuilder<'a>,
    ) -> io::Result<VirtualDeviceBuilder<'a>> {
        if self.properties.iter().next().is_some() {
            builder = builder.with_properties(&self.properties)?;
        }
        if self.keys.iter().next().is_some() {
            builder = builder.with_keys(&self.keys)?;
        }
        if self.relative_axes.iter().next().is_some() {
            builder = builder.with_relative_axes(&self.relative_axes)?;
        }
        for axis in &self.absolute_axes {
            let setup = UinputAbsSetup::new(
                AbsoluteAxisType(axis.code),
                AbsInfo::new(
                    0,
                    axis.minimum,
                    axis.maximum,
                    axis.fuzz,
                    axis.flat,
                    axis.resolution,
                ),
            );
            builder = builder.with_absolute_axis(&setup)?;
        }
        if self.misc.iter().next().is_some() {
            builder = builder.with_msc(&self.misc)?;
        }
        if self.switches.iter().next().is_some() {
            builder = builder.with_switches(&self.switches)?;
        }
        Ok(builder)
    }
}

/// Registers devices with the kernel's uinput module. Requires write access to `/dev/uinput`.
#[derive(Debug, Default)]
pub struct UinputRegistrar;

impl Registrar for UinputRegistrar {
    type Device = VirtualDevice;

    fn register(&mut self, descriptor: &Descriptor) -> io::Result<(VirtualDevice, PathBuf)> {
        let capabilities = Capabilities::from_descriptor(descriptor);
        let id = descriptor.id();
        let builder = VirtualDeviceBuilder::new()?
            .name(uinput_name(descriptor.name()))
            .input_id(InputId::new(
                BusType(id.bustype),
                id.vendor,
                id.product,
                id.version,
            ));

        // From here on the device exists. Returning early drops it, which closes the uinput
        // descriptor and makes the kernel remove the device again.
        let mut device = capabilities.apply(builder)?.build()?;
        let devnode = device
            .enumerate_dev_nodes_blocking()?
            .next() // Expect only one. Using fold or calling next again blocks indefinitely
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "devnode is not found"))??;

        if !capabilities.initial_switches.is_empty() {
            let events: Vec<InputEvent> = capabilities
                .initial_switches
                .iter()
                .map(|&(code, value)| InputEvent::new(EventType::SWITCH, code, value))
                .collect();
            device.emit(&events)?;
        }
        Ok((device, devnode))
    }
}

/// Truncates `name` to what uinput accepts, on a character boundary.
pub fn uinput_name(name: &str) -> &str {
    let max = UINPUT_MAX_NAME_SIZE - 1;
    if name.len() <= max {
        return name;
    }
    let mut end = max;
    while !name.is_char_boundary(end) {
        end -= 1;
    }
    log::warn!("device name is longer than {max} bytes, truncating");
    &name[..end]
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOUCHSCREEN: &str = "\
N: vtouch
I: 0018 04f3 2a1c 0100
P: 02
B: 00 3b 00 02 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 00 00 00 00 00 00 00
B: 01 00 04 00 00 00 00 00 00
B: 03 03 00 00 00 00 80 60 02
B: 04 10
B: 05 03
B: 11 01
A: 00 0 3199 0 0 12
A: 01 0 1799 0 0 12
S: 00 1
S: 01 0
";

    #[test]
    fn maps_every_registered_capability() {
        let desc = Descriptor::parse(TOUCHSCREEN).unwrap();
        let caps = Capabilities::from_descriptor(&desc);

        // INPUT_PROP_DIRECT
        assert!(caps.properties.contains(PropType(1)));
        assert_eq!(caps.properties.iter().count(), 1);
        assert!(caps.keys.contains(Key::BTN_TOUCH));
        assert_eq!(caps.keys.iter().count(), 1);
        // MSC_SCAN
        assert!(caps.misc.contains(MiscType(4)));
        assert_eq!(caps.switches.iter().count(), 2);
        assert_eq!(caps.relative_axes.iter().count(), 0);

        let codes: Vec<u16> = caps.absolute_axes.iter().map(|a| a.code).collect();
        assert_eq!(codes, vec![0x00, 0x01, 0x2f, 0x35, 0x36, 0x39]);
        assert_eq!(caps.absolute_axes[0].maximum, 3199);
        assert_eq!(caps.absolute_axes[0].resolution, 12);
        // Axes without an A: line are registered with zeroed calibration.
        assert_eq!(
            caps.absolute_axes[2],
            AbsAxis {
                code: 0x2f,
                ..Default::default()
            }
        );
    }

    #[test]
    fn host_driven_types_are_skipped() {
        let desc = Descriptor::parse(TOUCHSCREEN).unwrap();
        let caps = Capabilities::from_descriptor(&desc);
        assert_eq!(caps.skipped_types, vec![0x11]);
    }

    #[test]
    fn only_switches_that_are_on_are_sent() {
        let desc = Descriptor::parse(TOUCHSCREEN).unwrap();
        let caps = Capabilities::from_descriptor(&desc);
        assert_eq!(caps.initial_switches, vec![(0, 1)]);

        // A state for a switch the device does not have is ignored.
        let desc = Descriptor::parse("N: lid\nB: 00 21\nB: 05 01\nS: 00 1\nS: 09 1\n").unwrap();
        assert_eq!(Capabilities::from_descriptor(&desc).initial_switches, vec![(0, 1)]);
    }

    #[test]
    fn short_names_are_untouched() {
        assert_eq!(uinput_name("vtest"), "vtest");
        assert_eq!(uinput_name(""), "");
    }

    #[test]
    fn long_names_are_truncated_on_char_boundary() {
        let ascii = "x".repeat(100);
        assert_eq!(uinput_name(&ascii).len(), UINPUT_MAX_NAME_SIZE - 1);

        // 'é' is two bytes: 39 of them end at byte 78, the 40th would cross 79.
        let accented = "é".repeat(50);
        let truncated = uinput_name(&accented);
        assert_eq!(truncated.len(), 78);
        assert_eq!(truncated.chars().count(), 39);
    }
}
