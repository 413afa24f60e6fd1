//! Types related to the _Program Association Table_

use crate::packet;
use crate::psi::{SectionError, SyntaxSection};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProgramDescriptor {
    /// `program_number` 0 is reserved for the network information table
    Network { pid: packet::Pid },
    Program {
        program_number: u16,
        pid: packet::Pid,
    },
}

impl ProgramDescriptor {
    /// panics if fewer than 4 bytes are provided
    pub fn from_bytes(data: &[u8]) -> ProgramDescriptor {
        let program_number = (u16::from(data[0]) << 8) | u16::from(data[1]);
        let pid = packet::Pid::from_bytes(data[2], data[3]);
        if program_number == 0 {
            ProgramDescriptor::Network { pid }
        } else {
            ProgramDescriptor::Program {
                program_number,
                pid,
            }
        }
    }

    pub fn pid(&self) -> packet::Pid {
        match *self {
            ProgramDescriptor::Network { pid } => pid,
            ProgramDescriptor::Program { pid, .. } => pid,
        }
    }
}

/// Sections of the _Program Association Table_ give details of the programs within a transport
/// stream.  There may be only one program, or in the case of a broadcast multiplex, there may
/// be many.
#[derive(Clone, Debug)]
pub struct PatSection<'buf> {
    data: &'buf [u8],
}
impl<'buf> PatSection<'buf> {
    pub const TABLE_ID: u8 = 0x00;

    /// Wraps the body of a section, between the table syntax header and the CRC.
    pub fn new(data: &'buf [u8]) -> PatSection<'buf> {
        PatSection { data }
    }

    /// Checks the table_id of a complete section, and wraps its body.
    pub fn from_section(section: &'buf [u8]) -> Result<PatSection<'buf>, SectionError> {
        let sect = SyntaxSection::from_bytes(section)?;
        sect.expect_table_id(Self::TABLE_ID)?;
        Ok(PatSection::new(sect.body))
    }

    pub fn programs(&self) -> impl Iterator<Item = ProgramDescriptor> + 'buf {
        ProgramIter {
            buf: &self.data[..],
        }
    }

    /// The PMT PIDs of the real programs, skipping the network entry.
    pub fn program_pids(&self) -> impl Iterator<Item = packet::Pid> + 'buf {
        self.programs().filter_map(|p| match p {
            ProgramDescriptor::Program { pid, .. } => Some(pid),
            ProgramDescriptor::Network { .. } => None,
        })
    }
}

/// Iterate over the list of programs in a `PatSection`.
struct ProgramIter<'buf> {
    buf: &'buf [u8],
}
impl<'buf> Iterator for ProgramIter<'buf> {
    type Item = ProgramDescriptor;

    fn next(&mut self) -> Option<Self::Item> {
        if self.buf.len() < 4 {
            return None;
        }
        let (head, tail) = self.buf.split_at(4);
        self.buf = tail;
        Some(ProgramDescriptor::from_bytes(head))
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::psi::test::make_section;
    use assert_matches::assert_matches;
    use hex_literal::*;

    #[test]
    fn programs() {
        let sect = make_section(0, &hex!("0001 c1 00 00  0000 e010  0001 e100  0002 e200"));
        let pat = PatSection::from_section(&sect).unwrap();
        let progs: Vec<_> = pat.programs().collect();
        assert_eq!(
            progs[0],
            ProgramDescriptor::Network {
                pid: packet::Pid::new(0x10)
            }
        );
        assert_eq!(progs[1].pid(), packet::Pid::new(0x100));
        let pids: Vec<_> = pat.program_pids().collect();
        assert_eq!(pids, vec![packet::Pid::new(0x100), packet::Pid::new(0x200)]);
    }

    #[test]
    fn wrong_table() {
        let sect = make_section(2, &hex!("0001 c1 00 00  0001 e100"));
        assert_matches!(
            PatSection::from_section(&sect),
            Err(SectionError::UnexpectedTableId {
                expected: 0,
                actual: 2
            })
        );
    }

    #[test]
    fn trailing_partial_entry_ignored() {
        let data = hex!("0001 e100 00");
        let pat = PatSection::new(&data);
        assert_eq!(pat.programs().count(), 1);
    }
}
