//! Self-relative NT security descriptors.
//!
//! Descriptors are stored and returned as opaque self-relative blobs. The
//! provider only needs to validate them and to replace individual sections
//! (owner, group, SACL, DACL) when a `SetSecurity` call selects them.
//!
//! Layout of the 20-byte header:
//!
//! | offset | size | field        |
//! |--------|------|--------------|
//! | 0      | 1    | revision (1) |
//! | 1      | 1    | sbz1         |
//! | 2      | 2    | control      |
//! | 4      | 4    | owner offset |
//! | 8      | 4    | group offset |
//! | 12     | 4    | SACL offset  |
//! | 16     | 4    | DACL offset  |

use crate::error::{ProviderError, ProviderResult};
use bitflags::bitflags;

const HEADER_LEN: usize = 20;
const SD_REVISION: u8 = 1;
const SID_REVISION: u8 = 1;
const SID_MAX_SUB_AUTHORITIES: usize = 15;
const ACL_HEADER_LEN: usize = 8;

bitflags! {
    /// Sections selected by a security query or update.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct SecurityInformation: u32 {
        const OWNER = 0x0000_0001;
        const GROUP = 0x0000_0002;
        const DACL = 0x0000_0004;
        const SACL = 0x0000_0008;
        const LABEL = 0x0000_0010;
        const PROTECTED_DACL = 0x8000_0000;
        const PROTECTED_SACL = 0x4000_0000;
        const UNPROTECTED_DACL = 0x2000_0000;
        const UNPROTECTED_SACL = 0x1000_0000;
    }
}

bitflags! {
    /// `SECURITY_DESCRIPTOR_CONTROL` bits.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Control: u16 {
        const OWNER_DEFAULTED = 0x0001;
        const GROUP_DEFAULTED = 0x0002;
        const DACL_PRESENT = 0x0004;
        const DACL_DEFAULTED = 0x0008;
        const SACL_PRESENT = 0x0010;
        const SACL_DEFAULTED = 0x0020;
        const DACL_AUTO_INHERIT_REQ = 0x0100;
        const SACL_AUTO_INHERIT_REQ = 0x0200;
        const DACL_AUTO_INHERITED = 0x0400;
        const SACL_AUTO_INHERITED = 0x0800;
        const DACL_PROTECTED = 0x1000;
        const SACL_PROTECTED = 0x2000;
        const RM_CONTROL_VALID = 0x4000;
        const SELF_RELATIVE = 0x8000;
    }
}

impl Control {
    const DACL_BITS: Self = Self::DACL_PRESENT
        .union(Self::DACL_DEFAULTED)
        .union(Self::DACL_AUTO_INHERIT_REQ)
        .union(Self::DACL_AUTO_INHERITED)
        .union(Self::DACL_PROTECTED);
    const SACL_BITS: Self = Self::SACL_PRESENT
        .union(Self::SACL_DEFAULTED)
        .union(Self::SACL_AUTO_INHERIT_REQ)
        .union(Self::SACL_AUTO_INHERITED)
        .union(Self::SACL_PROTECTED);
}

/// A validated self-relative security descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecurityDescriptor {
    control: Control,
    owner: Option<Vec<u8>>,
    group: Option<Vec<u8>>,
    sacl: Option<Vec<u8>>,
    dacl: Option<Vec<u8>>,
}

impl Default for SecurityDescriptor {
    /// Self-relative descriptor with no owner or group and a present, null DACL.
    fn default() -> Self {
        Self {
            control: Control::SELF_RELATIVE | Control::DACL_PRESENT,
            owner: None,
            group: None,
            sacl: None,
            dacl: None,
        }
    }
}

impl SecurityDescriptor {
    /// Parses and validates a self-relative descriptor.
    pub fn parse(bytes: &[u8]) -> ProviderResult<Self> {
        if bytes.len() < HEADER_LEN {
            return Err(ProviderError::InvalidSecurityDescriptor("truncated header"));
        }
        if bytes[0] != SD_REVISION {
            return Err(ProviderError::InvalidSecurityDescriptor("unsupported revision"));
        }
        let control = Control::from_bits_retain(u16::from_le_bytes([bytes[2], bytes[3]]));
        if !control.contains(Control::SELF_RELATIVE) {
            return Err(ProviderError::InvalidSecurityDescriptor("not self-relative"));
        }

        let owner = section(bytes, read_u32(bytes, 4), sid_len)?;
        let group = section(bytes, read_u32(bytes, 8), sid_len)?;
        let sacl = if control.contains(Control::SACL_PRESENT) {
            section(bytes, read_u32(bytes, 12), acl_len)?
        } else {
            None
        };
        let dacl = if control.contains(Control::DACL_PRESENT) {
            section(bytes, read_u32(bytes, 16), acl_len)?
        } else {
            None
        };

        Ok(Self {
            control,
            owner,
            group,
            sacl,
            dacl,
        })
    }

    /// Control bits.
    pub fn control(&self) -> Control {
        self.control
    }

    /// Owner SID bytes, if any.
    pub fn owner(&self) -> Option<&[u8]> {
        self.owner.as_deref()
    }

    /// Group SID bytes, if any.
    pub fn group(&self) -> Option<&[u8]> {
        self.group.as_deref()
    }

    /// DACL bytes. `None` with DACL_PRESENT set is a null DACL.
    pub fn dacl(&self) -> Option<&[u8]> {
        self.dacl.as_deref()
    }

    /// SACL bytes, if any.
    pub fn sacl(&self) -> Option<&[u8]> {
        self.sacl.as_deref()
    }

    /// Returns a copy of `self` with the sections named by `info` taken from
    /// `modification`. Unselected sections and their control bits are kept.
    #[must_use]
    pub fn merge(&self, info: SecurityInformation, modification: &Self) -> Self {
        let mut merged = self.clone();
        if info.contains(SecurityInformation::OWNER) {
            merged.owner.clone_from(&modification.owner);
            merged.control.set(
                Control::OWNER_DEFAULTED,
                modification.control.contains(Control::OWNER_DEFAULTED),
            );
        }
        if info.contains(SecurityInformation::GROUP) {
            merged.group.clone_from(&modification.group);
            merged.control.set(
                Control::GROUP_DEFAULTED,
                modification.control.contains(Control::GROUP_DEFAULTED),
            );
        }
        if info.contains(SecurityInformation::DACL) {
            merged.dacl.clone_from(&modification.dacl);
            merged.control.remove(Control::DACL_BITS);
            merged.control |= modification.control & Control::DACL_BITS;
        }
        if info.contains(SecurityInformation::SACL) {
            merged.sacl.clone_from(&modification.sacl);
            merged.control.remove(Control::SACL_BITS);
            merged.control |= modification.control & Control::SACL_BITS;
        }
        if info.contains(SecurityInformation::PROTECTED_DACL) {
            merged.control.insert(Control::DACL_PROTECTED);
        } else if info.contains(SecurityInformation::UNPROTECTED_DACL) {
            merged.control.remove(Control::DACL_PROTECTED);
        }
        if info.contains(SecurityInformation::PROTECTED_SACL) {
            merged.control.insert(Control::SACL_PROTECTED);
        } else if info.contains(SecurityInformation::UNPROTECTED_SACL) {
            merged.control.remove(Control::SACL_PROTECTED);
        }
        merged.control.insert(Control::SELF_RELATIVE);
        merged
    }

    /// Serializes to self-relative form (header, owner, group, SACL, DACL).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = vec![0u8; HEADER_LEN];
        out[0] = SD_REVISION;
        out[2..4].copy_from_slice(&self.control.bits().to_le_bytes());

        let mut place = |field_offset: usize, data: Option<&Vec<u8>>| {
            if let Some(data) = data {
                let at = u32::try_from(out.len()).unwrap_or(0);
                out[field_offset..field_offset + 4].copy_from_slice(&at.to_le_bytes());
                out.extend_from_slice(data);
            }
        };
        place(4, self.owner.as_ref());
        place(8, self.group.as_ref());
        place(12, self.sacl.as_ref());
        place(16, self.dacl.as_ref());
        out
    }

    /// Size of the serialized form in bytes.
    pub fn len(&self) -> usize {
        HEADER_LEN
            + [&self.owner, &self.group, &self.sacl, &self.dacl]
                .iter()
                .map(|s| s.as_ref().map_or(0, Vec::len))
                .sum::<usize>()
    }

    /// Always false; a descriptor has at least its header.
    pub fn is_empty(&self) -> bool {
        false
    }
}

/// Copies a serialized descriptor into an optional caller buffer.
///
/// Returns the descriptor size. When `out` is present but smaller than the
/// descriptor, fails with [`ProviderError::BufferOverflow`] carrying the size.
pub fn copy_to_buffer(descriptor: &[u8], out: Option<&mut [u8]>) -> ProviderResult<usize> {
    let required = descriptor.len();
    if let Some(buf) = out {
        if buf.len() < required {
            return Err(ProviderError::BufferOverflow { required });
        }
        buf[..required].copy_from_slice(descriptor);
    }
    Ok(required)
}

fn read_u32(bytes: &[u8], at: usize) -> usize {
    let raw = u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]]);
    usize::try_from(raw).unwrap_or(usize::MAX)
}

fn section(
    bytes: &[u8],
    offset: usize,
    measure: fn(&[u8]) -> ProviderResult<usize>,
) -> ProviderResult<Option<Vec<u8>>> {
    if offset == 0 {
        return Ok(None);
    }
    if offset < HEADER_LEN || offset >= bytes.len() {
        return Err(ProviderError::InvalidSecurityDescriptor("section offset out of range"));
    }
    let rest = &bytes[offset..];
    let len = measure(rest)?;
    Ok(Some(rest[..len].to_vec()))
}

fn sid_len(bytes: &[u8]) -> ProviderResult<usize> {
    if bytes.len() < 8 || bytes[0] != SID_REVISION {
        return Err(ProviderError::InvalidSecurityDescriptor("malformed SID"));
    }
    let count = usize::from(bytes[1]);
    if count > SID_MAX_SUB_AUTHORITIES {
        return Err(ProviderError::InvalidSecurityDescriptor("too many SID sub-authorities"));
    }
    let len = 8 + 4 * count;
    if bytes.len() < len {
        return Err(ProviderError::InvalidSecurityDescriptor("truncated SID"));
    }
    Ok(len)
}

fn acl_len(bytes: &[u8]) -> ProviderResult<usize> {
    if bytes.len() < ACL_HEADER_LEN || !matches!(bytes[0], 2 | 4) {
        return Err(ProviderError::InvalidSecurityDescriptor("malformed ACL"));
    }
    let len = usize::from(u16::from_le_bytes([bytes[2], bytes[3]]));
    if len < ACL_HEADER_LEN || bytes.len() < len {
        return Err(ProviderError::InvalidSecurityDescriptor("truncated ACL"));
    }
    Ok(len)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// S-1-5-32-544 (BUILTIN\Administrators).
    pub(crate) fn admins_sid() -> Vec<u8> {
        let mut sid = vec![1, 2, 0, 0, 0, 0, 0, 5];
        sid.extend_from_slice(&32u32.to_le_bytes());
        sid.extend_from_slice(&544u32.to_le_bytes());
        sid
    }

    /// S-1-1-0 (Everyone).
    pub(crate) fn everyone_sid() -> Vec<u8> {
        let mut sid = vec![1, 1, 0, 0, 0, 0, 0, 1];
        sid.extend_from_slice(&0u32.to_le_bytes());
        sid
    }

    /// ACL granting GENERIC_ALL to Everyone.
    pub(crate) fn allow_everyone_acl() -> Vec<u8> {
        let sid = everyone_sid();
        let ace_len = 8 + sid.len();
        let acl_len = ACL_HEADER_LEN + ace_len;
        let mut acl = vec![2, 0];
        acl.extend_from_slice(&u16::try_from(acl_len).unwrap().to_le_bytes());
        acl.extend_from_slice(&1u16.to_le_bytes());
        acl.extend_from_slice(&0u16.to_le_bytes());
        // ACCESS_ALLOWED_ACE: type 0, flags 0, size, mask
        acl.extend_from_slice(&[0, 0]);
        acl.extend_from_slice(&u16::try_from(ace_len).unwrap().to_le_bytes());
        acl.extend_from_slice(&0x1000_0000u32.to_le_bytes());
        acl.extend_from_slice(&sid);
        acl
    }

    pub(crate) fn sample_descriptor() -> Vec<u8> {
        SecurityDescriptor {
            control: Control::SELF_RELATIVE | Control::DACL_PRESENT,
            owner: Some(admins_sid()),
            group: Some(everyone_sid()),
            sacl: None,
            dacl: Some(allow_everyone_acl()),
        }
        .to_bytes()
    }

    #[test]
    fn test_default_is_null_dacl_header() {
        let bytes = SecurityDescriptor::default().to_bytes();
        assert_eq!(bytes.len(), 20);
        assert_eq!(bytes[0], 1);
        assert_eq!(u16::from_le_bytes([bytes[2], bytes[3]]), 0x8004);
        assert!(bytes[4..].iter().all(|b| *b == 0));
    }

    #[test]
    fn test_parse_sample() {
        let bytes = sample_descriptor();
        let sd = SecurityDescriptor::parse(&bytes).unwrap();
        assert_eq!(sd.owner(), Some(admins_sid().as_slice()));
        assert_eq!(sd.group(), Some(everyone_sid().as_slice()));
        assert_eq!(sd.dacl(), Some(allow_everyone_acl().as_slice()));
        assert!(sd.sacl().is_none());
        assert_eq!(sd.len(), bytes.len());
        assert_eq!(sd.to_bytes(), bytes);
    }

    #[test]
    fn test_parse_rejects_garbage() {
        assert!(SecurityDescriptor::parse(&[1, 0, 0]).is_err());
        let mut bytes = sample_descriptor();
        bytes[0] = 7;
        assert!(SecurityDescriptor::parse(&bytes).is_err());

        // Owner offset past the end
        let mut bytes = sample_descriptor();
        bytes[4..8].copy_from_slice(&500u32.to_le_bytes());
        assert!(matches!(
            SecurityDescriptor::parse(&bytes),
            Err(ProviderError::InvalidSecurityDescriptor(_))
        ));

        // Absolute (non self-relative) form
        let mut bytes = SecurityDescriptor::default().to_bytes();
        bytes[3] = 0;
        assert!(SecurityDescriptor::parse(&bytes).is_err());
    }

    #[test]
    fn test_merge_replaces_only_selected_sections() {
        let original = SecurityDescriptor::parse(&sample_descriptor()).unwrap();
        let modification = SecurityDescriptor {
            control: Control::SELF_RELATIVE | Control::OWNER_DEFAULTED,
            owner: Some(everyone_sid()),
            group: None,
            sacl: None,
            dacl: None,
        };

        let merged = original.merge(SecurityInformation::OWNER, &modification);
        assert_eq!(merged.owner(), Some(everyone_sid().as_slice()));
        assert_eq!(merged.group(), original.group());
        assert_eq!(merged.dacl(), original.dacl());
        assert!(merged.control().contains(Control::OWNER_DEFAULTED));
        assert!(merged.control().contains(Control::DACL_PRESENT));
    }

    #[test]
    fn test_merge_dacl_removes_presence() {
        let original = SecurityDescriptor::parse(&sample_descriptor()).unwrap();
        let no_dacl = SecurityDescriptor {
            control: Control::SELF_RELATIVE,
            owner: None,
            group: None,
            sacl: None,
            dacl: None,
        };
        let merged = original.merge(SecurityInformation::DACL, &no_dacl);
        assert!(merged.dacl().is_none());
        assert!(!merged.control().contains(Control::DACL_PRESENT));
        assert_eq!(merged.owner(), original.owner());

        let reparsed = SecurityDescriptor::parse(&merged.to_bytes()).unwrap();
        assert_eq!(reparsed, merged);
    }

    #[test]
    fn test_copy_to_buffer_reports_size() {
        let bytes = sample_descriptor();
        assert_eq!(copy_to_buffer(&bytes, None).unwrap(), bytes.len());

        let mut small = [0u8; 4];
        match copy_to_buffer(&bytes, Some(&mut small)) {
            Err(ProviderError::BufferOverflow { required }) => assert_eq!(required, bytes.len()),
            other => panic!("expected overflow, got {other:?}"),
        }

        let mut big = vec![0u8; 256];
        assert_eq!(copy_to_buffer(&bytes, Some(&mut big)).unwrap(), bytes.len());
        assert_eq!(&big[..bytes.len()], bytes.as_slice());
    }
}
