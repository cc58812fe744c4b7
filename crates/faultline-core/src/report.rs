//! # Report Writing
//!
//! Append-only text emission over an already-open output stream, plus the
//! date-time formatting helpers the report and the path templates share.
//!
//! Every formatting operation renders into a fixed-size stack buffer first
//! and is truncated, never grown, on overflow; the stream sees only complete
//! lines. Write errors are latched instead of propagated so a full disk or
//! closed pipe degrades the report rather than faulting inside the fault
//! handler. Lines are CRLF-terminated so the report opens cleanly in every
//! OS-bundled viewer.

use std::fmt;
use std::fmt::Write as _;
use std::io::Write;

use crate::types::FixedString;

/// Maximum rendered length of one report line, excluding the terminator.
const LINE_CAPACITY: usize = 2048;

/// CRLF-terminated line writer over any byte sink.
///
/// The writer owns no buffering of its own beyond the per-line scratch; it
/// is constructed around an open stream, used for one report, and dropped.
pub struct ReportWriter<W: Write>
{
    out: W,
    failed: bool,
}

impl<W: Write> ReportWriter<W>
{
    /// Wrap an open stream.
    pub fn new(out: W) -> Self
    {
        Self { out, failed: false }
    }

    /// Write one formatted line, CRLF-terminated.
    ///
    /// Content beyond the line capacity is truncated. Never fails; a write
    /// error latches [`Self::failed`] and later lines become no-ops.
    pub fn line(&mut self, args: fmt::Arguments<'_>)
    {
        if self.failed {
            return;
        }

        let mut scratch = FixedString::<LINE_CAPACITY>::new();
        let _ = scratch.write_fmt(args);

        if self.out.write_all(scratch.as_str().as_bytes()).is_err() || self.out.write_all(b"\r\n").is_err() {
            self.failed = true;
        }
    }

    /// Write an empty line.
    pub fn blank(&mut self)
    {
        self.line(format_args!(""));
    }

    /// `true` once any write has failed; subsequent output is discarded.
    pub fn failed(&self) -> bool
    {
        self.failed
    }

    /// Flush the underlying stream.
    pub fn finish(mut self) -> bool
    {
        let ok = self.out.flush().is_ok();
        ok && !self.failed
    }
}

/// Render a unix timestamp as a date-time string.
///
/// `local` selects local time over GMT. `file_safe` swaps the separators for
/// characters legal in file names: `2024-07-01 10.30.59` instead of
/// `2024/07/01 10:30:59`. Uses `gmtime_r`/`localtime_r`, which do not
/// allocate.
pub(crate) fn format_datetime(secs: i64, local: bool, file_safe: bool, out: &mut FixedString<64>)
{
    out.clear();

    let time = secs as libc::time_t;
    let mut tm: libc::tm = unsafe { std::mem::zeroed() };
    let ok = unsafe {
        if local {
            !libc::localtime_r(&time, &mut tm).is_null()
        } else {
            !libc::gmtime_r(&time, &mut tm).is_null()
        }
    };
    if !ok {
        out.push_str("(unknown time)");
        return;
    }

    let (date_sep, time_sep) = if file_safe { ("-", ".") } else { ("/", ":") };
    let _ = write!(
        out,
        "{:04}{}{:02}{}{:02} {:02}{}{:02}{}{:02}",
        tm.tm_year + 1900,
        date_sep,
        tm.tm_mon + 1,
        date_sep,
        tm.tm_mday,
        tm.tm_hour,
        time_sep,
        tm.tm_min,
        time_sep,
        tm.tm_sec
    );
}

/// Expand a path template into `out`, substituting the first `%s` with the
/// file-name-safe GMT date-time for `secs`. Templates without `%s` are
/// copied through unchanged.
pub(crate) fn expand_path_template(template: &str, secs: i64, out: &mut FixedString<512>)
{
    out.clear();

    match template.split_once("%s") {
        Some((before, after)) => {
            let mut stamp = FixedString::<64>::new();
            format_datetime(secs, false, true, &mut stamp);
            out.push_str(before);
            out.push_str(stamp.as_str());
            out.push_str(after);
        }
        None => out.push_str(template),
    }
}

#[cfg(test)]
mod tests
{
    use super::*;

    #[test]
    fn lines_are_crlf_terminated()
    {
        let mut buf = Vec::new();
        {
            let mut w = ReportWriter::new(&mut buf);
            w.line(format_args!("Exception Info"));
            w.line(format_args!("value: {}", 7));
        }
        assert_eq!(buf, b"Exception Info\r\nvalue: 7\r\n");
    }

    #[test]
    fn oversized_lines_truncate_but_terminate()
    {
        let mut buf = Vec::new();
        {
            let mut w = ReportWriter::new(&mut buf);
            let long = "x".repeat(LINE_CAPACITY * 2);
            w.line(format_args!("{long}"));
        }
        assert_eq!(buf.len(), LINE_CAPACITY + 2);
        assert!(buf.ends_with(b"\r\n"));
    }

    #[test]
    fn datetime_formats_are_stable()
    {
        // 2021-03-02 04:05:06 GMT.
        let secs = 1_614_657_906;
        let mut out = FixedString::<64>::new();

        format_datetime(secs, false, false, &mut out);
        assert_eq!(out.as_str(), "2021/03/02 04:05:06");

        format_datetime(secs, false, true, &mut out);
        assert_eq!(out.as_str(), "2021-03-02 04.05.06");
    }

    #[test]
    fn path_template_substitutes_datetime()
    {
        let mut out = FixedString::<512>::new();
        expand_path_template("/tmp/report %s.txt", 1_614_657_906, &mut out);
        assert_eq!(out.as_str(), "/tmp/report 2021-03-02 04.05.06.txt");

        expand_path_template("/tmp/plain.txt", 0, &mut out);
        assert_eq!(out.as_str(), "/tmp/plain.txt");
    }
}
