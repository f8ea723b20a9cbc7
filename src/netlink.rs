//! Generic-netlink subscription to the kernel's IOAM6 event multicast
//! group, plus the attribute (TLV) parsing the decoders build on.
//!
//! The socket is a raw `AF_NETLINK`/`NETLINK_GENERIC` fd: the family and
//! multicast group are resolved through an nlctrl GETFAMILY roundtrip at
//! startup, then the fd is switched to non-blocking and driven through
//! tokio's `AsyncFd` so a slow consumer never blocks the runtime.

use std::io;
use std::mem;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use anyhow::{bail, Context};
use tokio::io::unix::AsyncFd;

use crate::wire::{read_u16_ne, read_u32_ne, DecodeError};

pub const IOAM6_GENL_NAME: &str = "IOAM6";
pub const IOAM6_GENL_GROUP_NAME: &str = "ioam6_events";

/// IOAM generic netlink commands.
pub const IOAM6_EVENT_TRACE: u8 = 1;
pub const IOAM6_EVENT_DEX: u8 = 2;

const NLMSG_HDRLEN: usize = 16;
const GENL_HDRLEN: usize = 4;
const NLMSG_ERROR: u16 = 2;
const NLA_TYPE_MASK: u16 = 0x3FFF;

const GENL_ID_CTRL: u16 = 0x10;
const CTRL_CMD_GETFAMILY: u8 = 3;
const CTRL_ATTR_FAMILY_ID: u16 = 1;
const CTRL_ATTR_FAMILY_NAME: u16 = 2;
const CTRL_ATTR_MCAST_GROUPS: u16 = 7;
const CTRL_ATTR_MCAST_GRP_NAME: u16 = 1;
const CTRL_ATTR_MCAST_GRP_ID: u16 = 2;

const RECV_BUF_LEN: usize = 64 * 1024;

/// One kernel event: the generic-netlink command plus its attribute
/// payload, still encoded. Owned so it can move into a per-event task.
#[derive(Debug, Clone)]
pub struct Event {
    pub command: u8,
    pub payload: Vec<u8>,
}

/// A parsed netlink attribute, borrowing from the event payload.
#[derive(Debug, Clone, Copy)]
pub struct Attribute<'a> {
    pub kind: u16,
    pub data: &'a [u8],
}

/// Walks a netlink TLV region. Attribute lengths include the 4-byte
/// header; payloads are padded to 4-byte alignment.
pub fn parse_attributes(buf: &[u8]) -> Result<Vec<Attribute<'_>>, DecodeError> {
    let mut attrs = Vec::new();
    let mut pos = 0;
    while pos < buf.len() {
        if pos + 4 > buf.len() {
            return Err(DecodeError::Truncated("netlink attribute header"));
        }
        let len = read_u16_ne(&buf[pos..], "attribute length")? as usize;
        let kind = read_u16_ne(&buf[pos + 2..], "attribute type")? & NLA_TYPE_MASK;
        if len < 4 || pos + len > buf.len() {
            return Err(DecodeError::Truncated("netlink attribute payload"));
        }
        attrs.push(Attribute {
            kind,
            data: &buf[pos + 4..pos + len],
        });
        pos += (len + 3) & !3;
    }
    Ok(attrs)
}

/// Splits one received datagram into IOAM6 events. Messages for other
/// families (control acks and the like) are skipped.
fn parse_events(buf: &[u8], family_id: u16) -> Vec<Event> {
    let mut events = Vec::new();
    let mut pos = 0;
    while pos + NLMSG_HDRLEN <= buf.len() {
        let len = match read_u32_ne(&buf[pos..], "nlmsg length") {
            Ok(len) => len as usize,
            Err(_) => break,
        };
        if len < NLMSG_HDRLEN || pos + len > buf.len() {
            break;
        }
        let msg_type = read_u16_ne(&buf[pos + 4..], "nlmsg type").unwrap_or(0);
        if msg_type == family_id && len >= NLMSG_HDRLEN + GENL_HDRLEN {
            events.push(Event {
                command: buf[pos + NLMSG_HDRLEN],
                payload: buf[pos + NLMSG_HDRLEN + GENL_HDRLEN..pos + len].to_vec(),
            });
        }
        pos += (len + 3) & !3;
    }
    events
}

/// Subscribed IOAM6 event source.
pub struct IoamListener {
    fd: AsyncFd<OwnedFd>,
    family_id: u16,
}

impl IoamListener {
    /// Opens the generic-netlink socket, resolves the IOAM6 family and its
    /// event multicast group, and joins the group. Any failure here is
    /// fatal to the caller: without the subscription no event can arrive.
    pub async fn subscribe() -> anyhow::Result<Self> {
        let fd = netlink_socket().context("failed to open generic netlink socket")?;

        send_all(fd.as_raw_fd(), &getfamily_request(IOAM6_GENL_NAME))
            .context("failed to send GETFAMILY request")?;

        let mut buf = vec![0u8; RECV_BUF_LEN];
        let n = recv(fd.as_raw_fd(), &mut buf).context("failed to read GETFAMILY reply")?;
        let (family_id, group_id) = parse_family_reply(&buf[..n], IOAM6_GENL_GROUP_NAME)
            .with_context(|| format!("failed to resolve genetlink family {}", IOAM6_GENL_NAME))?;
        tracing::debug!(
            "resolved family {} (id {}), group {} (id {})",
            IOAM6_GENL_NAME,
            family_id,
            IOAM6_GENL_GROUP_NAME,
            group_id
        );

        join_group(fd.as_raw_fd(), group_id)
            .with_context(|| format!("failed to join multicast group {}", IOAM6_GENL_GROUP_NAME))?;
        set_nonblocking(fd.as_raw_fd())?;

        Ok(IoamListener {
            fd: AsyncFd::new(fd)?,
            family_id,
        })
    }

    /// Receives the next datagram and splits it into events. A receive
    /// error is surfaced to the caller, which accounts it as a kernel
    /// buffer overflow (ENOBUFS) and keeps draining.
    pub async fn next(&self) -> io::Result<Vec<Event>> {
        let mut buf = vec![0u8; RECV_BUF_LEN];
        loop {
            let mut guard = self.fd.readable().await?;
            match guard.try_io(|inner| recv(inner.as_raw_fd(), &mut buf)) {
                Ok(result) => return result.map(|n| parse_events(&buf[..n], self.family_id)),
                Err(_would_block) => continue,
            }
        }
    }
}

fn netlink_socket() -> io::Result<OwnedFd> {
    let fd = unsafe {
        libc::socket(
            libc::AF_NETLINK,
            libc::SOCK_RAW | libc::SOCK_CLOEXEC,
            libc::NETLINK_GENERIC,
        )
    };
    if fd < 0 {
        return Err(io::Error::last_os_error());
    }
    let fd = unsafe { OwnedFd::from_raw_fd(fd) };

    let mut addr: libc::sockaddr_nl = unsafe { mem::zeroed() };
    addr.nl_family = libc::AF_NETLINK as libc::sa_family_t;
    let rc = unsafe {
        libc::bind(
            fd.as_raw_fd(),
            &addr as *const libc::sockaddr_nl as *const libc::sockaddr,
            mem::size_of::<libc::sockaddr_nl>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(fd)
}

fn join_group(fd: RawFd, group_id: u32) -> io::Result<()> {
    let rc = unsafe {
        libc::setsockopt(
            fd,
            libc::SOL_NETLINK,
            libc::NETLINK_ADD_MEMBERSHIP,
            &group_id as *const u32 as *const libc::c_void,
            mem::size_of::<u32>() as libc::socklen_t,
        )
    };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn set_nonblocking(fd: RawFd) -> io::Result<()> {
    let flags = unsafe { libc::fcntl(fd, libc::F_GETFL) };
    if flags < 0 {
        return Err(io::Error::last_os_error());
    }
    let rc = unsafe { libc::fcntl(fd, libc::F_SETFL, flags | libc::O_NONBLOCK) };
    if rc < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn send_all(fd: RawFd, buf: &[u8]) -> io::Result<()> {
    let n = unsafe { libc::send(fd, buf.as_ptr().cast(), buf.len(), 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(())
}

fn recv(fd: RawFd, buf: &mut [u8]) -> io::Result<usize> {
    let n = unsafe { libc::recv(fd, buf.as_mut_ptr().cast(), buf.len(), 0) };
    if n < 0 {
        return Err(io::Error::last_os_error());
    }
    Ok(n as usize)
}

/// nlctrl CTRL_CMD_GETFAMILY request carrying the family name attribute.
/// Netlink headers and attributes are native-endian.
fn getfamily_request(name: &str) -> Vec<u8> {
    let name_z: Vec<u8> = name.bytes().chain(std::iter::once(0)).collect();
    let nla_len = (4 + name_z.len()) as u16;
    let pad = (4 - name_z.len() % 4) % 4;
    let msg_len = (NLMSG_HDRLEN + GENL_HDRLEN + 4 + name_z.len() + pad) as u32;

    let mut buf = Vec::with_capacity(msg_len as usize);
    buf.extend_from_slice(&msg_len.to_ne_bytes());
    buf.extend_from_slice(&GENL_ID_CTRL.to_ne_bytes());
    buf.extend_from_slice(&(libc::NLM_F_REQUEST as u16).to_ne_bytes());
    buf.extend_from_slice(&1u32.to_ne_bytes()); // sequence
    buf.extend_from_slice(&0u32.to_ne_bytes()); // port id, kernel-assigned
    buf.push(CTRL_CMD_GETFAMILY);
    buf.push(1); // genl version
    buf.extend_from_slice(&0u16.to_ne_bytes());
    buf.extend_from_slice(&nla_len.to_ne_bytes());
    buf.extend_from_slice(&CTRL_ATTR_FAMILY_NAME.to_ne_bytes());
    buf.extend_from_slice(&name_z);
    buf.resize(buf.len() + pad, 0);
    buf
}

/// Extracts the family id and the id of the named multicast group from a
/// GETFAMILY reply. The groups live in a nested attribute: one
/// index-keyed entry per group, each holding name and id attributes.
fn parse_family_reply(buf: &[u8], group_name: &str) -> anyhow::Result<(u16, u32)> {
    if buf.len() < NLMSG_HDRLEN + GENL_HDRLEN {
        bail!("short GETFAMILY reply ({} bytes)", buf.len());
    }
    let msg_type = read_u16_ne(&buf[4..], "nlmsg type")?;
    if msg_type == NLMSG_ERROR {
        let errno = -i32::from_ne_bytes(buf[NLMSG_HDRLEN..NLMSG_HDRLEN + 4].try_into()?);
        bail!(
            "kernel rejected GETFAMILY: {}",
            io::Error::from_raw_os_error(errno)
        );
    }
    let msg_len = (read_u32_ne(buf, "nlmsg length")? as usize)
        .clamp(NLMSG_HDRLEN + GENL_HDRLEN, buf.len());

    let mut family_id = None;
    let mut group_id = None;
    for attr in parse_attributes(&buf[NLMSG_HDRLEN + GENL_HDRLEN..msg_len])? {
        match attr.kind {
            CTRL_ATTR_FAMILY_ID => family_id = Some(read_u16_ne(attr.data, "family id")?),
            CTRL_ATTR_MCAST_GROUPS => {
                for entry in parse_attributes(attr.data)? {
                    let mut name = None;
                    let mut id = None;
                    for group_attr in parse_attributes(entry.data)? {
                        match group_attr.kind {
                            CTRL_ATTR_MCAST_GRP_NAME => {
                                let raw = group_attr.data;
                                let end = raw.iter().position(|&b| b == 0).unwrap_or(raw.len());
                                name = Some(&raw[..end]);
                            }
                            CTRL_ATTR_MCAST_GRP_ID => {
                                id = Some(read_u32_ne(group_attr.data, "group id")?)
                            }
                            _ => {}
                        }
                    }
                    if name == Some(group_name.as_bytes()) {
                        group_id = id;
                    }
                }
            }
            _ => {}
        }
    }

    match (family_id, group_id) {
        (Some(family), Some(group)) => Ok((family, group)),
        (None, _) => bail!("GETFAMILY reply carries no family id"),
        (_, None) => bail!("multicast group {} not found", group_name),
    }
}
