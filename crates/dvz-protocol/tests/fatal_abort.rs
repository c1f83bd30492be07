// Confirms the one thing that distinguishes a fatal `ErrorKind` from
// every other request failure: `Dispatcher::submit` aborts the process
// for one instead of logging it and moving on to the next request.
// `std::process::abort()` can't be observed from inside the process that
// calls it, so this test re-execs the test binary as a child (the same
// trick a CLI uses to test its own crash path), letting the parent
// assert on the child's exit status instead.

use std::os::unix::process::ExitStatusExt;
use std::process::Command;

use dvz_protocol::protocol::{RequestFlags, ShaderSource, ShaderStage};
use dvz_protocol::{Batch, Context, ContextInfo, IdCounter};

const CHILD_ENV_VAR: &str = "DVZ_FATAL_ABORT_CHILD";
const THIS_TEST: &str = "a_required_shader_failing_to_compile_aborts_instead_of_being_skipped";

#[test]
fn a_required_shader_failing_to_compile_aborts_instead_of_being_skipped() {
    if std::env::var_os(CHILD_ENV_VAR).is_some() {
        run_fatal_request();
        return;
    }

    let exe = std::env::current_exe().expect("test binary has a current_exe path");
    let status = Command::new(exe)
        .arg("--exact")
        .arg(THIS_TEST)
        .env(CHILD_ENV_VAR, "1")
        .status()
        .expect("failed to re-exec the test binary as a child process");

    assert!(!status.success(), "a fatal ShaderCompile error should abort submit(), not let it return");
    #[cfg(unix)]
    assert_eq!(status.signal(), Some(6 /* SIGABRT */), "the child should have been killed by abort(), not exited some other way");
}

/// Runs in the child process only: submits one malformed-SPIR-V
/// `CreateShader` request (SPIR-V byte length not a multiple of 4, which
/// `Shader::create` rejects with `ErrorKind::ShaderCompile`, a fatal
/// kind) alongside an ordinary, independently-skippable failure, and
/// confirms the process never reaches the end of `submit`.
fn run_fatal_request() {
    let mut ctx = Context::new(&ContextInfo::default()).expect("headless context construction should always succeed on a working Vulkan install");
    let ids = IdCounter::new();

    let mut batch = Batch::new();
    // An ordinary, recoverable failure earlier in the same batch: this
    // must NOT be what aborts the process, the shader request below is.
    let stale = ids.next();
    batch.upload_dat(stale, 0, vec![1u8; 4], None, RequestFlags::empty());
    batch.create_shader(&ids, ShaderStage::Vertex, ShaderSource::Spirv(vec![0u8; 5]));

    ctx.submit(batch);

    // Only reachable if submit() failed to abort on the fatal request.
    std::process::exit(0);
}
