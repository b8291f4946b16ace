// This file contains functions common to other tests: test files, a scripted stand-in for the
// external programs and some high-level tests which run a whole cluster.

// Copyright 2024 Ryan Wick (rrwick@gmail.com)

// This file is part of AmrLocus. AmrLocus is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by the Free Software
// Foundation, either version 3 of the License, or (at your option) any later version. AmrLocus is
// distributed in the hope that it will be useful, but WITHOUT ANY WARRANTY; without even the
// implied warranty of MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the GNU General
// Public License for more details. You should have received a copy of the GNU General Public
// License along with AmrLocus. If not, see <http://www.gnu.org/licenses/>.

use flate2::Compression;
use flate2::write::GzEncoder;
use std::cell::RefCell;
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::commands::{Invocation, ToolOutput, ToolRunner};
use crate::error::Result;
use crate::external_progs::{ExternalProgs, CLUSTER_PROGRAMS};
use crate::nucmer::NucmerHit;


pub fn assert_almost_eq(a: f64, b: f64, epsilon: f64) {
    assert!((a - b).abs() < epsilon,
            "Numbers are not within {:?} of each other: {} vs {}", epsilon, a, b);
}


pub fn make_test_file(file_path: &Path, contents: &str) {
    let mut file = File::create(file_path).unwrap();
    write!(file, "{}", contents).unwrap();
}


pub fn make_gzipped_test_file(file_path: &Path, contents: &str) {
    let mut file = File::create(file_path).unwrap();
    let mut e = GzEncoder::new(Vec::new(), Compression::default());
    e.write_all(contents.as_bytes()).unwrap();
    let _ = file.write_all(&e.finish().unwrap());
}


pub fn make_hit(ref_start: usize, ref_end: usize, qry_start: usize, qry_end: usize, pc_id: f64,
                qry_name: &str) -> NucmerHit {
    NucmerHit { ref_start, ref_end, qry_start, qry_end,
                hit_length_ref: ref_end - ref_start + 1,
                hit_length_qry: qry_start.abs_diff(qry_end) + 1,
                percent_identity: pc_id, ref_length: 100, qry_length: 200,
                ref_name: "ref".to_string(), qry_name: qry_name.to_string() }
}


/// Every cluster program, with its own name as its path.
pub fn fake_progs() -> ExternalProgs {
    let paths: Vec<(&str, &str)> = CLUSTER_PROGRAMS.iter().map(|p| (*p, *p)).collect();
    ExternalProgs::from_paths(&paths)
}


type Handler = Box<dyn Fn(&Invocation) -> ToolOutput>;


/// A ToolRunner which runs nothing. Handlers, registered per program, write whatever output files
/// a test needs. Programs without a handler succeed and write nothing.
#[derive(Default)]
pub struct FakeRunner {
    handlers: HashMap<String, Handler>,
    calls: RefCell<Vec<Invocation>>,
}

impl FakeRunner {
    pub fn new() -> Self {
        FakeRunner::default()
    }

    pub fn on<F>(mut self, program: &str, handler: F) -> Self
            where F: Fn(&Invocation) -> ToolOutput + 'static {
        self.handlers.insert(program.to_string(), Box::new(handler));
        self
    }

    pub fn calls(&self) -> Vec<Invocation> {
        self.calls.borrow().clone()
    }

    pub fn call_count(&self, program: &str) -> usize {
        self.calls.borrow().iter().filter(|c| c.program == program).count()
    }
}

impl ToolRunner for FakeRunner {
    fn run(&self, invocation: &Invocation) -> Result<ToolOutput> {
        self.calls.borrow_mut().push(invocation.clone());
        match self.handlers.get(&invocation.program) {
            Some(handler) => Ok(handler(invocation)),
            None => Ok(ToolOutput::ok()),
        }
    }
}


/// Writes to the file named by the given option of an invocation (or its stdout redirect when the
/// option is ">").
pub fn write_tool_output(invocation: &Invocation, option: &str, contents: &str) {
    let path = if option == ">" { invocation.stdout_to.clone() }
               else { invocation.value_of(option) };
    make_test_file(&path.unwrap(), contents);
}


/// Stands in for bgzip: compresses the file named by the last argument to <file>.gz and removes
/// the original.
pub fn fake_bgzip(invocation: &Invocation) -> ToolOutput {
    let filename = PathBuf::from(invocation.args.last().unwrap());
    let contents = std::fs::read_to_string(&filename).unwrap();
    let mut gz_name = filename.as_os_str().to_owned();
    gz_name.push(".gz");
    make_gzipped_test_file(Path::new(&gz_name), &contents);
    std::fs::remove_file(&filename).unwrap();
    ToolOutput::ok()
}


/// The first argument, which is the subcommand for samtools and bcftools.
pub fn subcommand(invocation: &Invocation) -> String {
    invocation.args.first().map(|a| a.to_string_lossy().into_owned()).unwrap_or_default()
}
