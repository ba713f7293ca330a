//! Accelerator tables.

use scroll::Pread;

/// The key is a virtual-key code rather than a character.
pub const ACCEL_FVIRTKEY: u16 = 0x01;
pub const ACCEL_FNOINVERT: u16 = 0x02;
pub const ACCEL_FSHIFT: u16 = 0x04;
pub const ACCEL_FCONTROL: u16 = 0x08;
pub const ACCEL_FALT: u16 = 0x10;
/// Marks the table's final entry.
pub const ACCEL_END: u16 = 0x80;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Accelerator {
    pub flags: u16,
    /// Character code or virtual-key code, per [`ACCEL_FVIRTKEY`]
    pub key: u16,
    pub command_id: u16,
}

impl Accelerator {
    pub fn is_virtual_key(&self) -> bool {
        self.flags & ACCEL_FVIRTKEY != 0
    }
    pub fn needs_control(&self) -> bool {
        self.flags & ACCEL_FCONTROL != 0
    }
    pub fn needs_shift(&self) -> bool {
        self.flags & ACCEL_FSHIFT != 0
    }
    pub fn needs_alt(&self) -> bool {
        self.flags & ACCEL_FALT != 0
    }
}

/// Parse the 8-byte entry array; the `END` flag terminates it.
pub fn parse(data: &[u8]) -> Option<Vec<Accelerator>> {
    let mut accelerators = Vec::new();
    let mut offset = 0usize;
    loop {
        let flags: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let key: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let command_id: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let _padding: u16 = data.gread_with(&mut offset, scroll::LE).ok()?;
        accelerators.push(Accelerator {
            flags,
            key,
            command_id,
        });
        if flags & ACCEL_END != 0 {
            break;
        }
    }
    Some(accelerators)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stops_at_end_flag() {
        let mut data = Vec::new();
        for &(flags, key, cmd) in &[
            (ACCEL_FVIRTKEY | ACCEL_FCONTROL, 0x43u16, 100u16), // Ctrl+C
            (ACCEL_FVIRTKEY | ACCEL_END, 0x70, 101),            // F1, last
            (0xffff, 0xffff, 0xffff),                           // junk past END
        ] {
            data.extend_from_slice(&flags.to_le_bytes());
            data.extend_from_slice(&key.to_le_bytes());
            data.extend_from_slice(&cmd.to_le_bytes());
            data.extend_from_slice(&0u16.to_le_bytes());
        }
        let accelerators = parse(&data).unwrap();
        assert_eq!(accelerators.len(), 2);
        assert!(accelerators[0].needs_control());
        assert_eq!(accelerators[1].command_id, 101);
    }

    #[test]
    fn unterminated_table_is_rejected() {
        let data = [ACCEL_FVIRTKEY as u8, 0, 0x41, 0, 1, 0, 0, 0];
        assert!(parse(&data).is_none());
    }
}
