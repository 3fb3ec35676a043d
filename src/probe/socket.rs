use anyhow::{Result, anyhow};
use socket2::{Domain, Protocol, Socket, Type};
use std::time::Duration;

/// Send buffer requested for direct-mode sockets
pub const SEND_BUFFER_SIZE: usize = 128 * 1024;

/// Longest a send may block before it counts as failed
pub const SEND_TIMEOUT: Duration = Duration::from_millis(100);

/// Fewest sockets opened per worker
pub const MIN_POOL_SOCKETS: u64 = 10;
/// Most sockets opened per worker
pub const MAX_POOL_SOCKETS: u64 = 50;
/// Target rate served by each socket before another is added
pub const QPS_PER_SOCKET: u64 = 2000;

/// Number of sockets to open for a worker with the given aggregate rate.
///
/// One socket per 2000 QPS, never fewer than 10 nor more than 50.
pub fn socket_pool_size(target_rate: u64) -> usize {
    (target_rate / QPS_PER_SOCKET).clamp(MIN_POOL_SOCKETS, MAX_POOL_SOCKETS) as usize
}

/// Create an unbound UDP socket; the kernel supplies source address and headers
pub fn create_udp_dgram_socket() -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP))?;

    socket.set_nonblocking(false)?;
    socket.set_reuse_address(true)?;
    socket.set_write_timeout(Some(SEND_TIMEOUT))?;

    // Best effort: the kernel may cap it at net.core.wmem_max
    let _ = socket.set_send_buffer_size(SEND_BUFFER_SIZE);

    Ok(socket)
}

/// Create a raw UDP socket that takes a caller-built IPv4 header.
/// Requires root/CAP_NET_RAW.
pub fn create_raw_udp_socket() -> Result<Socket> {
    let socket = Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::UDP))?;

    socket.set_nonblocking(false)?;
    socket.set_write_timeout(Some(SEND_TIMEOUT))?;
    set_header_included(&socket)?;

    Ok(socket)
}

/// Enable IP_HDRINCL so the kernel sends our IPv4 header as-is
#[cfg(unix)]
pub fn set_header_included(socket: &Socket) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let val: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            socket.as_raw_fd(),
            libc::IPPROTO_IP,
            libc::IP_HDRINCL,
            &val as *const _ as *const libc::c_void,
            std::mem::size_of_val(&val) as libc::socklen_t,
        )
    };
    if ret != 0 {
        return Err(std::io::Error::last_os_error().into());
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn set_header_included(_socket: &Socket) -> Result<()> {
    Err(anyhow!("IP_HDRINCL is only supported on unix platforms"))
}

/// Check up front whether spoofed ranges will be able to open raw sockets
pub fn check_raw_permissions() -> Result<()> {
    if create_raw_udp_socket().is_ok() {
        return Ok(());
    }

    let binary_path = std::env::current_exe()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| "dnsload".to_string());

    Err(anyhow!(
        "Insufficient permissions for raw sockets; spoofed ranges will not start.\n\n\
         Fix options:\n\
         \u{2022} Run with sudo: sudo dnsload <target>\n\
         \u{2022} Add capability: sudo setcap cap_net_raw+ep {}\n\
         \u{2022} Disable use_ip_spoofing for those ranges",
        binary_path
    ))
}
