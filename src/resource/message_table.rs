//! Message tables.

use scroll::Pread;

use crate::resource::utf16_string;

/// Entry text is UTF-16.
pub const MESSAGE_RESOURCE_UNICODE: u16 = 0x0001;

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageEntry {
    pub message_id: u32,
    pub flags: u16,
    pub text: String,
}

impl MessageEntry {
    pub fn is_unicode(&self) -> bool {
        self.flags == MESSAGE_RESOURCE_UNICODE
    }
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageBlock {
    pub low_id: u32,
    pub high_id: u32,
    pub messages: Vec<MessageEntry>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageTable {
    pub blocks: Vec<MessageBlock>,
}

impl MessageTable {
    /// Look a message up by id across all blocks.
    pub fn message(&self, id: u32) -> Option<&str> {
        self.blocks
            .iter()
            .filter(|b| (b.low_id..=b.high_id).contains(&id))
            .flat_map(|b| &b.messages)
            .find(|m| m.message_id == id)
            .map(|m| m.text.as_str())
    }
}

pub fn parse(data: &[u8]) -> Option<MessageTable> {
    let mut offset = 0usize;
    let num_blocks: u32 = data.gread_with(&mut offset, scroll::LE).ok()?;
    let mut table = MessageTable::default();

    for _ in 0..num_blocks.min(crate::tools::MAX_TABLE_ENTRIES as u32) {
        let low_id: u32 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let high_id: u32 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let entries_offset: u32 = data.gread_with(&mut offset, scroll::LE).ok()?;
        let mut block = MessageBlock {
            low_id,
            high_id,
            messages: Vec::new(),
        };

        if (entries_offset as usize) < data.len() && low_id <= high_id {
            let mut entry_offset = entries_offset as usize;
            for index in 0..=(high_id - low_id) {
                let Ok(length) = data.pread_with::<u16>(entry_offset, scroll::LE) else {
                    break;
                };
                let Ok(flags) = data.pread_with::<u16>(entry_offset + 2, scroll::LE) else {
                    break;
                };
                if length < 4 || entry_offset + length as usize > data.len() {
                    break;
                }
                let body = &data[entry_offset + 4..entry_offset + length as usize];
                let text = if flags == MESSAGE_RESOURCE_UNICODE {
                    utf16_string(body)
                } else {
                    let len = body.iter().position(|&b| b == 0).unwrap_or(body.len());
                    String::from_utf8_lossy(&body[..len]).into_owned()
                };
                block.messages.push(MessageEntry {
                    message_id: low_id + index,
                    flags,
                    text,
                });
                entry_offset += length as usize;
            }
        }
        table.blocks.push(block);
    }
    Some(table)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ansi_and_unicode_entries() {
        let mut data = Vec::new();
        data.extend_from_slice(&1u32.to_le_bytes()); // one block
        data.extend_from_slice(&10u32.to_le_bytes()); // low id
        data.extend_from_slice(&11u32.to_le_bytes()); // high id
        data.extend_from_slice(&16u32.to_le_bytes()); // entries at 16
        // entry 10: ANSI "ok"
        data.extend_from_slice(&8u16.to_le_bytes());
        data.extend_from_slice(&0u16.to_le_bytes());
        data.extend_from_slice(b"ok\0\0");
        // entry 11: UTF-16 "no"
        data.extend_from_slice(&10u16.to_le_bytes());
        data.extend_from_slice(&MESSAGE_RESOURCE_UNICODE.to_le_bytes());
        for unit in "no".encode_utf16() {
            data.extend_from_slice(&unit.to_le_bytes());
        }
        data.extend_from_slice(&0u16.to_le_bytes());

        let table = parse(&data).unwrap();
        assert_eq!(table.blocks.len(), 1);
        assert_eq!(table.message(10), Some("ok"));
        assert_eq!(table.message(11), Some("no"));
        assert!(table.blocks[0].messages[1].is_unicode());
        assert_eq!(table.message(12), None);
    }
}
