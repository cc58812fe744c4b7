//! # macOS FFI Declarations
//!
//! `extern "C"` declarations for the Mach, pthread, dyld, and libproc
//! functions this crate needs that are not provided by the `mach2` crate.
//! Everything here is wrapped in safe abstractions elsewhere; keeping the
//! raw declarations in one place makes them easy to audit.

use libc::{c_char, c_int, c_void, kern_return_t, mach_msg_type_number_t, mach_port_t, natural_t, thread_act_t};

/// First eight bytes of a 64-bit Mach-O image header; enough to find the
/// load commands that follow it.
#[repr(C)]
pub struct MachHeader64
{
    pub magic: u32,
    pub cputype: i32,
    pub cpusubtype: i32,
    pub filetype: u32,
    pub ncmds: u32,
    pub sizeofcmds: u32,
    pub flags: u32,
    pub reserved: u32,
}

/// Generic load command prefix.
#[repr(C)]
pub struct LoadCommand
{
    pub cmd: u32,
    pub cmdsize: u32,
}

/// 64-bit segment load command (`LC_SEGMENT_64`).
#[repr(C)]
pub struct SegmentCommand64
{
    pub cmd: u32,
    pub cmdsize: u32,
    pub segname: [u8; 16],
    pub vmaddr: u64,
    pub vmsize: u64,
    pub fileoff: u64,
    pub filesize: u64,
    pub maxprot: i32,
    pub initprot: i32,
    pub nsects: u32,
    pub flags: u32,
}

/// `LC_SEGMENT_64` command id.
pub const LC_SEGMENT_64: u32 = 0x19;

extern "C" {
    /// Suspend a single thread within the current task.
    pub fn thread_suspend(target_act: thread_act_t) -> kern_return_t;

    /// Resume a previously suspended thread.
    pub fn thread_resume(target_act: thread_act_t) -> kern_return_t;

    /// Read a thread's register state for the given flavor.
    pub fn thread_get_state(
        target_act: thread_act_t,
        flavor: c_int,
        new_state: *mut natural_t,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Read scheduling/run-state info for a thread.
    pub fn thread_info(
        target_act: thread_act_t,
        flavor: c_int,
        thread_info_out: *mut natural_t,
        count: *mut mach_msg_type_number_t,
    ) -> kern_return_t;

    /// Release a port right obtained from `task_threads()` and friends.
    pub fn mach_port_deallocate(task: mach_port_t, name: mach_port_t) -> kern_return_t;

    /// Free memory vended by the kernel (e.g. the `task_threads()` array).
    pub fn vm_deallocate(task: mach_port_t, address: libc::vm_address_t, size: libc::vm_size_t) -> kern_return_t;

    /// Save the task's current exception ports for a mask.
    pub fn task_get_exception_ports(
        task: mach_port_t,
        exception_mask: u32,
        masks: *mut u32,
        count: *mut mach_msg_type_number_t,
        old_handlers: *mut mach_port_t,
        old_behaviors: *mut c_int,
        old_flavors: *mut c_int,
    ) -> kern_return_t;

    /// Route the task's exceptions for a mask to the given port.
    pub fn task_set_exception_ports(
        task: mach_port_t,
        exception_mask: u32,
        new_port: mach_port_t,
        behavior: c_int,
        new_flavor: c_int,
    ) -> kern_return_t;

    /// Map a Mach thread port to its pthread handle.
    pub fn pthread_from_mach_thread_np(thread: thread_act_t) -> libc::pthread_t;

    /// Map a pthread handle to its Mach thread port.
    pub fn pthread_mach_thread_np(thread: libc::pthread_t) -> thread_act_t;

    /// Highest address of a pthread's stack (stacks grow downward).
    pub fn pthread_get_stackaddr_np(thread: libc::pthread_t) -> *mut c_void;

    /// Size of a pthread's stack in bytes.
    pub fn pthread_get_stacksize_np(thread: libc::pthread_t) -> libc::size_t;

    /// Read a pthread's name.
    pub fn pthread_getname_np(thread: libc::pthread_t, name: *mut c_char, len: libc::size_t) -> c_int;

    /// List pids for all processes on the system.
    pub fn proc_listpids(proc_type: u32, typeinfo: u32, buffer: *mut c_void, buffersize: c_int) -> c_int;

    /// Filesystem path of a process image.
    pub fn proc_pidpath(pid: c_int, buffer: *mut c_void, buffersize: u32) -> c_int;

    /// Number of images currently mapped by dyld.
    pub fn _dyld_image_count() -> u32;

    /// Mach-O header of the image at `index`.
    pub fn _dyld_get_image_header(index: u32) -> *const MachHeader64;

    /// File path of the image at `index`.
    pub fn _dyld_get_image_name(index: u32) -> *const c_char;

    /// ASLR slide applied to the image at `index`.
    pub fn _dyld_get_image_vmaddr_slide(index: u32) -> isize;
}
