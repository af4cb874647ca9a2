/* Centralize all the context we can about a particular linking task
 *
 * The order of files on the command line is important, so store
 * the inputs as a stream of items we'll step through one at a time.
 * Search directories are collected separately: every -L must be known
 * before the first -lNAME reference is resolved.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

pub type Filename = String;

/* we have to handle a stream of input items, which could be object
   files, archives, -lNAME references, or a whole group of archives */
#[derive(Clone)]
pub enum StreamItem
{
    File(Filename),
    Group(Group),
}

/* handle groups of archives linked to a fixed point */
#[derive(Clone)]
pub struct Group
{
    files: Vec<Filename>,
}

impl Group
{
    pub fn new() -> Group { Group { files: Vec::new() } }
    pub fn add(&mut self, file: &str) { self.files.push(String::from(file)) }
    pub fn iter(&self) -> std::slice::Iter<'_, Filename> { self.files.iter() }
}

/* this is what we're working with: a collection of inputs to process
   plus the handful of settings the command line can carry */
#[derive(Clone)]
pub struct Context
{
    output_file: Filename,          /* this can be set at any time */
    config_file: Option<Filename>,  /* this can be set at any time */
    text_base: Option<u64>,         /* -textseg overrides the config file */
    strip: bool,
    search_paths: Vec<Filename>,    /* -L directories in command-line order */
    input_stream: Vec<StreamItem>,  /* a list of streamed items to process */
}

impl Context
{
    pub fn new() -> Context
    {
        Context
        {
            /* the ld-compatible executable filename default is a.out */
            output_file: String::from("a.out"),

            /* leave the rest blank */
            config_file: None,
            text_base: None,
            strip: false,
            search_paths: Vec::new(),
            input_stream: Vec::new(),
        }
    }

    /* functions to update and access the link context */
    pub fn add_to_stream(&mut self, item: StreamItem)
    {
        self.input_stream.push(item);
    }

    pub fn add_search_path(&mut self, path: &str)
    {
        self.search_paths.push(String::from(path));
    }

    pub fn set_output_file(&mut self, path: &str)
    {
        self.output_file = String::from(path);
    }

    pub fn set_config_file(&mut self, path: &str)
    {
        self.config_file = Some(String::from(path));
    }

    pub fn set_text_base(&mut self, addr: u64)
    {
        self.text_base = Some(addr);
    }

    pub fn set_strip(&mut self)
    {
        self.strip = true;
    }

    pub fn get_output_file(&self) -> String { self.output_file.clone() }
    pub fn get_config_file(&self) -> Option<String> { self.config_file.clone() }
    pub fn get_text_base(&self) -> Option<u64> { self.text_base }
    pub fn get_strip(&self) -> bool { self.strip }

    pub fn search_paths(&self) -> std::slice::Iter<'_, Filename>
    {
        self.search_paths.iter()
    }

    pub fn stream_iter(&self) -> std::slice::Iter<'_, StreamItem>
    {
        self.input_stream.iter()
    }
}
