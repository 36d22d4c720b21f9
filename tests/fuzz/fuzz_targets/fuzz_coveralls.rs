#![no_main]
use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    let _ = covmanager::parsers::coveralls::parse(data);
    let _ = covmanager::parsers::coveralls::git_info(data);
});
