use std::path::PathBuf;

/// Byte order of a loaded image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Endianness {
    Little,
    Big,
}

/// Describes the machine an image was built for: word size, byte order, and
/// a canonical name used both for display and for picking default library
/// search paths.
///
/// Two images may only be loaded into the same address space when their
/// architecture descriptors compare equal (`spec.md` §4.3) — this is the
/// only compatibility check the resolver performs.
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Arch {
    name: String,
    bits: u8,
    endianness: Endianness,
}

impl Arch {
    pub fn new(name: impl Into<String>, bits: u8, endianness: Endianness) -> Self {
        Self {
            name: name.into(),
            bits,
            endianness,
        }
    }

    pub fn x86_64() -> Self {
        Self::new("x86_64", 64, Endianness::Little)
    }

    pub fn x86() -> Self {
        Self::new("x86", 32, Endianness::Little)
    }

    pub fn aarch64() -> Self {
        Self::new("aarch64", 64, Endianness::Little)
    }

    /// Best-effort mapping from a goblin/ELF `e_machine` value and
    /// bitness flag to an [`Arch`]. Unrecognized machines fall back to a
    /// descriptor named after the raw machine number, which still compares
    /// unequal to every known architecture (and so never loads).
    pub fn from_elf_machine(machine: u16, is_64: bool, little_endian: bool) -> Self {
        let name = match machine {
            goblin::elf::header::EM_X86_64 => "x86_64",
            goblin::elf::header::EM_386 => "x86",
            goblin::elf::header::EM_AARCH64 => "aarch64",
            goblin::elf::header::EM_ARM => "arm",
            _ => return Self::new(format!("elf-machine-{machine}"), if is_64 { 64 } else { 32 }, Self::endianness_of(little_endian)),
        };
        Self::new(name, if is_64 { 64 } else { 32 }, Self::endianness_of(little_endian))
    }

    pub fn from_pe_machine(is_64: bool) -> Self {
        if is_64 {
            Self::x86_64()
        } else {
            Self::x86()
        }
    }

    fn endianness_of(little: bool) -> Endianness {
        if little {
            Endianness::Little
        } else {
            Endianness::Big
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn bits(&self) -> u8 {
        self.bits
    }

    pub fn endianness(&self) -> Endianness {
        self.endianness
    }

    pub fn word_size(&self) -> usize {
        (self.bits / 8) as usize
    }

    /// Default library search directories for cross-compiled targets of
    /// this architecture, used as the last entry in the resolver's search
    /// list (`spec.md` §4.4 step 2).
    pub fn library_search_paths(&self) -> Vec<PathBuf> {
        match self.name.as_str() {
            "x86_64" => vec![
                PathBuf::from("/lib/x86_64-linux-gnu"),
                PathBuf::from("/usr/lib/x86_64-linux-gnu"),
                PathBuf::from("/usr/lib64"),
                PathBuf::from("/lib64"),
            ],
            "x86" => vec![
                PathBuf::from("/lib/i386-linux-gnu"),
                PathBuf::from("/usr/lib/i386-linux-gnu"),
                PathBuf::from("/usr/lib"),
                PathBuf::from("/lib"),
            ],
            "aarch64" => vec![
                PathBuf::from("/lib/aarch64-linux-gnu"),
                PathBuf::from("/usr/lib/aarch64-linux-gnu"),
            ],
            "arm" => vec![
                PathBuf::from("/lib/arm-linux-gnueabihf"),
                PathBuf::from("/usr/lib/arm-linux-gnueabihf"),
            ],
            _ => Vec::new(),
        }
    }
}
