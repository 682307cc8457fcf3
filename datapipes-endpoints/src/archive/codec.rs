//! Tar encoding of records
//!
//! Each field of a record is one tar member named `{key}.{field}`.
//! Reading groups consecutive members that share a key back into one
//! record, so a key split across non-adjacent members yields two records.

use std::io::{Read, Write};

use datapipes_core::Record;
use tar::{Archive, Builder, EntryType, Header};

use crate::error::{Error, Result};

/// Permission bits of written members
const MEMBER_MODE: u32 = 0o444;

/// Split a member path into record key and field name.
///
/// The field starts at the first `.` of the last path component, so
/// `train/0001.seg.png` belongs to key `train/0001` as field `seg.png`.
pub fn split_member(path: &str) -> Result<(&str, &str)> {
    let path = path.strip_prefix("./").unwrap_or(path);
    let base_start = path.rfind('/').map_or(0, |slash| slash + 1);
    let dot = path[base_start..]
        .find('.')
        .map(|dot| base_start + dot)
        .ok_or_else(|| Error::Archive(format!("member '{path}' has no field extension")))?;

    let (key, field) = (&path[..dot], &path[dot + 1..]);
    if dot == base_start || field.is_empty() {
        return Err(Error::Archive(format!("member '{path}' has an empty key or field")));
    }
    Ok((key, field))
}

/// Decodes a tar stream into records
pub struct TarReader<R: Read> {
    archive: Archive<R>,
}

impl<R: Read> TarReader<R> {
    /// Wrap a reader positioned at the start of a tar stream
    pub fn new(reader: R) -> Self {
        Self {
            archive: Archive::new(reader),
        }
    }

    /// Iterate over the records of the archive
    pub fn records(&mut self) -> Result<Records<'_, R>> {
        Ok(Records {
            entries: self.archive.entries()?,
            pending: None,
            done: false,
        })
    }
}

/// Iterator over the records of a [`TarReader`]
pub struct Records<'a, R: 'a + Read> {
    entries: tar::Entries<'a, R>,

    /// Record still collecting members
    pending: Option<Record>,

    done: bool,
}

impl<R: Read> Records<'_, R> {
    /// Read the next regular member as `(key, field, contents)`
    fn next_member(&mut self) -> Result<Option<(String, String, Vec<u8>)>> {
        for entry in self.entries.by_ref() {
            let mut entry = entry?;
            if entry.header().entry_type() != EntryType::Regular {
                continue;
            }

            let path = entry.path()?.to_string_lossy().into_owned();
            let (key, field) = split_member(&path)?;
            let (key, field) = (key.to_owned(), field.to_owned());

            let mut contents = Vec::with_capacity(usize::try_from(entry.size()).unwrap_or(0));
            entry.read_to_end(&mut contents)?;
            return Ok(Some((key, field, contents)));
        }
        Ok(None)
    }
}

impl<R: Read> Iterator for Records<'_, R> {
    type Item = Result<Record>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        loop {
            match self.next_member() {
                Ok(Some((key, field, contents))) => {
                    if let Some(record) = self.pending.as_mut().filter(|record| record.key() == key) {
                        record.insert(field, contents);
                        continue;
                    }
                    let started = Record::new(key).with_field(field, contents);
                    if let Some(finished) = self.pending.replace(started) {
                        return Some(Ok(finished));
                    }
                }
                Ok(None) => {
                    self.done = true;
                    return self.pending.take().map(Ok);
                }
                Err(error) => {
                    self.done = true;
                    return Some(Err(error));
                }
            }
        }
    }
}

/// Encodes records into a tar stream
pub struct TarWriter<W: Write> {
    builder: Builder<W>,
    records: u64,
}

impl<W: Write> TarWriter<W> {
    /// Start a tar stream on `writer`
    pub fn new(writer: W) -> Self {
        Self {
            builder: Builder::new(writer),
            records: 0,
        }
    }

    /// Append every field of `record` as a member
    pub fn write_record(&mut self, record: &Record) -> Result<()> {
        for (field, contents) in record.fields() {
            let mut header = Header::new_gnu();
            header.set_entry_type(EntryType::Regular);
            header.set_size(contents.len() as u64);
            header.set_mode(MEMBER_MODE);
            header.set_mtime(0);
            self.builder
                .append_data(&mut header, format!("{}.{field}", record.key()), &contents[..])?;
        }
        self.records += 1;
        Ok(())
    }

    /// Number of records written
    pub fn records_written(&self) -> u64 {
        self.records
    }

    /// Write the end-of-archive blocks, flush, and return the writer
    pub fn finish(self) -> Result<W> {
        let mut writer = self.builder.into_inner()?;
        writer.flush()?;
        Ok(writer)
    }
}
