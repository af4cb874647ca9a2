/* ulmld library finder
 *
 * Keeps the ordered list of directories searched for -lNAME libraries:
 * -L directories in command-line order first, then whatever the
 * ULM_LIBRARY_PATH environment variable appends.
 *
 * (c) Chris Williams, 2021.
 *
 * See LICENSE for usage and copying.
 */

use std::path::Path;

#[derive(Clone)]
pub struct Paths
{
    dirs: Vec<String>,
}

impl Paths
{
    pub fn new() -> Paths
    {
        Paths { dirs: Vec::new() }
    }

    /* only add paths to directories, each once; order is search order */
    pub fn add(&mut self, pathname: &str)
    {
        if Path::new(pathname).is_dir() && !self.dirs.iter().any(|dir| dir == pathname)
        {
            self.dirs.push(String::from(pathname));
        }
    }

    /* pull in the colon-separated ULM_LIBRARY_PATH directories */
    pub fn add_from_environment(&mut self)
    {
        if let Ok(libpath) = std::env::var("ULM_LIBRARY_PATH")
        {
            for dir in libpath.split(':')
            {
                if !dir.is_empty()
                {
                    self.add(dir);
                }
            }
        }
    }

    pub fn iter(&self) -> std::slice::Iter<'_, String>
    {
        self.dirs.iter()
    }
}
