use bytemuck::Contiguous;
use serde::ser::{Serialize, SerializeSeq, Serializer};
use spark::vk;
use std::fmt;
use std::ops::{BitOr, BitOrAssign};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessCategory(u32);

impl AccessCategory {
    pub const READ: AccessCategory = AccessCategory(0x1);
    pub const WRITE: AccessCategory = AccessCategory(0x2);

    pub fn empty() -> Self {
        Self(0)
    }

    pub fn contains(self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }

    pub fn is_write(self) -> bool {
        self.contains(Self::WRITE)
    }
}

impl BitOr for AccessCategory {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl BitOrAssign for AccessCategory {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

macro_rules! base_usage_impl {
    ($usage:ident, $usage_bit:ident, $usage_bit_iter:ident) => {
        #[derive(Clone, Copy, PartialEq, Eq)]
        pub struct $usage(u32);

        impl $usage {
            pub fn empty() -> Self {
                Self(0)
            }

            pub const fn union(self, other: Self) -> Self {
                Self(self.0 | other.0)
            }

            pub fn is_empty(self) -> bool {
                self.0 == 0
            }

            pub fn contains(self, other: Self) -> bool {
                (self.0 & other.0) == other.0
            }

            fn iter_set_bits(self) -> $usage_bit_iter {
                $usage_bit_iter(self)
            }

            pub fn names(self) -> impl Iterator<Item = &'static str> {
                self.iter_set_bits().map(|bit| bit.name())
            }
        }

        impl BitOr for $usage {
            type Output = Self;
            fn bitor(self, rhs: Self) -> Self {
                Self(self.0 | rhs.0)
            }
        }

        impl BitOrAssign for $usage {
            fn bitor_assign(&mut self, rhs: Self) {
                self.0 |= rhs.0;
            }
        }

        impl fmt::Debug for $usage {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                if self.is_empty() {
                    return f.write_str("empty");
                }
                for (i, name) in self.names().enumerate() {
                    if i != 0 {
                        f.write_str(" | ")?;
                    }
                    f.write_str(name)?;
                }
                Ok(())
            }
        }

        impl Serialize for $usage {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                let mut seq = serializer.serialize_seq(None)?;
                for name in self.names() {
                    seq.serialize_element(name)?;
                }
                seq.end()
            }
        }

        struct $usage_bit_iter($usage);

        impl Iterator for $usage_bit_iter {
            type Item = $usage_bit;

            fn next(&mut self) -> Option<Self::Item> {
                let pos = self.0 .0.trailing_zeros();
                if pos < 32 {
                    let bit = 1 << pos;
                    self.0 .0 &= !bit;
                    $usage_bit::from_integer(pos)
                } else {
                    None
                }
            }
        }
    };
}

macro_rules! buffer_usage_impl {
    ($(($name:ident, $usage_mask:expr, $stage_mask:expr, $access_mask:expr, $access_category:expr)),+ $(,)?) => {
        #[repr(u32)]
        #[derive(Clone, Copy, Contiguous)]
        #[allow(non_camel_case_types)]
        enum BufferUsageBit {
            $($name),+
        }

        impl BufferUsageBit {
            fn name(self) -> &'static str {
                match self {
                    $(BufferUsageBit::$name => stringify!($name)),+
                }
            }
        }

        base_usage_impl!(BufferUsage, BufferUsageBit, BufferUsageBitIterator);

        impl BufferUsage {
            $(pub const $name: BufferUsage = BufferUsage(1 << (BufferUsageBit::$name as u32));)+

            pub fn as_flags(self) -> vk::BufferUsageFlags {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(BufferUsageBit::$name => $usage_mask),+
                    })
                    .fold(vk::BufferUsageFlags::empty(), |m, u| m | u)
            }

            pub fn as_stage_mask(self) -> vk::PipelineStageFlags {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(BufferUsageBit::$name => $stage_mask),+
                    })
                    .fold(vk::PipelineStageFlags::empty(), |m, u| m | u)
            }

            pub fn as_access_mask(self) -> vk::AccessFlags {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(BufferUsageBit::$name => $access_mask),+
                    })
                    .fold(vk::AccessFlags::empty(), |m, u| m | u)
            }

            pub fn as_access_category(self) -> AccessCategory {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(BufferUsageBit::$name => $access_category),+
                    })
                    .fold(AccessCategory::empty(), |m, u| m | u)
            }
        }
    }
}

buffer_usage_impl! {
    (
        TRANSFER_WRITE,
        vk::BufferUsageFlags::TRANSFER_DST,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_WRITE,
        AccessCategory::WRITE
    ),
    (
        COMPUTE_STORAGE_READ,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::AccessFlags::SHADER_READ,
        AccessCategory::READ
    ),
    (
        VERTEX_BUFFER,
        vk::BufferUsageFlags::VERTEX_BUFFER,
        vk::PipelineStageFlags::VERTEX_INPUT,
        vk::AccessFlags::VERTEX_ATTRIBUTE_READ,
        AccessCategory::READ
    ),
    (
        VERTEX_STORAGE_READ,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::PipelineStageFlags::VERTEX_SHADER,
        vk::AccessFlags::SHADER_READ,
        AccessCategory::READ
    ),
    (
        INDEX_BUFFER,
        vk::BufferUsageFlags::INDEX_BUFFER,
        vk::PipelineStageFlags::VERTEX_INPUT,
        vk::AccessFlags::INDEX_READ,
        AccessCategory::READ
    ),
    (
        FRAGMENT_STORAGE_READ,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::AccessFlags::SHADER_READ,
        AccessCategory::READ
    ),
    (
        FRAGMENT_STORAGE_ATOMIC,
        vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::AccessFlags::SHADER_READ | vk::AccessFlags::SHADER_WRITE,
        AccessCategory::READ | AccessCategory::WRITE
    ),
    (
        ACCELERATION_STRUCTURE_BUILD_INPUT,
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_BUILD_INPUT_READ_ONLY_KHR,
        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags::SHADER_READ,
        AccessCategory::READ
    ),
    (
        ACCELERATION_STRUCTURE_BUILD_SCRATCH,
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR | vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR | vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
        AccessCategory::READ | AccessCategory::WRITE
    ),
    (
        ACCELERATION_STRUCTURE_READ,
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
        AccessCategory::READ
    ),
    (
        ACCELERATION_STRUCTURE_WRITE,
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
        vk::PipelineStageFlags::ACCELERATION_STRUCTURE_BUILD_KHR,
        vk::AccessFlags::ACCELERATION_STRUCTURE_WRITE_KHR,
        AccessCategory::WRITE
    ),
    (
        RAY_TRACING_ACCELERATION_STRUCTURE,
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR
            | vk::BufferUsageFlags::ACCELERATION_STRUCTURE_STORAGE_KHR,
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::ACCELERATION_STRUCTURE_READ_KHR,
        AccessCategory::READ
    ),
    (
        RAY_TRACING_SHADER_BINDING_TABLE,
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR | vk::BufferUsageFlags::SHADER_BINDING_TABLE_KHR,
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::SHADER_READ,
        AccessCategory::READ
    ),
    (
        RAY_TRACING_STORAGE_READ,
        vk::BufferUsageFlags::SHADER_DEVICE_ADDRESS_KHR | vk::BufferUsageFlags::STORAGE_BUFFER,
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::SHADER_READ,
        AccessCategory::READ
    ),
    (
        HOST_READ,
        vk::BufferUsageFlags::empty(),
        vk::PipelineStageFlags::HOST,
        vk::AccessFlags::HOST_READ,
        AccessCategory::READ
    ),
}

macro_rules! image_usage_impl {
    ($(($name:ident, $usage_mask:expr, $stage_mask:expr, $access_mask:expr, $image_layout:expr, $access_category:expr)),+ $(,)?) => {
        #[repr(u32)]
        #[derive(Clone, Copy, Contiguous)]
        #[allow(non_camel_case_types)]
        enum ImageUsageBit {
            $($name),+
        }

        impl ImageUsageBit {
            fn name(self) -> &'static str {
                match self {
                    $(ImageUsageBit::$name => stringify!($name)),+
                }
            }
        }

        base_usage_impl!(ImageUsage, ImageUsageBit, ImageUsageBitIterator);

        impl ImageUsage {
            $(pub const $name: ImageUsage = ImageUsage(1 << (ImageUsageBit::$name as u32));)+

            pub fn as_flags(self) -> vk::ImageUsageFlags {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(ImageUsageBit::$name => $usage_mask),+
                    })
                    .fold(vk::ImageUsageFlags::empty(), |m, u| m | u)
            }

            pub fn as_stage_mask(self) -> vk::PipelineStageFlags {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(ImageUsageBit::$name => $stage_mask),+
                    })
                    .fold(vk::PipelineStageFlags::empty(), |m, u| m | u)
            }

            pub fn as_access_mask(self) -> vk::AccessFlags {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(ImageUsageBit::$name => $access_mask),+
                    })
                    .fold(vk::AccessFlags::empty(), |m, u| m | u)
            }

            /// The single layout every bit agrees on, or `None` if two bits need different layouts.
            pub fn as_image_layout(self) -> Option<vk::ImageLayout> {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(ImageUsageBit::$name => $image_layout),+
                    })
                    .try_fold(vk::ImageLayout::UNDEFINED, |m, u| {
                        if m == u || m == vk::ImageLayout::UNDEFINED {
                            Some(u)
                        } else {
                            None
                        }
                    })
            }

            pub fn as_access_category(self) -> AccessCategory {
                self.iter_set_bits()
                    .map(|bit| match bit {
                        $(ImageUsageBit::$name => $access_category),+
                    })
                    .fold(AccessCategory::empty(), |m, u| m | u)
            }
        }
    }
}

image_usage_impl! {
    (
        TRANSFER_READ,
        vk::ImageUsageFlags::TRANSFER_SRC,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_READ,
        vk::ImageLayout::TRANSFER_SRC_OPTIMAL,
        AccessCategory::READ
    ),
    (
        TRANSFER_WRITE,
        vk::ImageUsageFlags::TRANSFER_DST,
        vk::PipelineStageFlags::TRANSFER,
        vk::AccessFlags::TRANSFER_WRITE,
        vk::ImageLayout::TRANSFER_DST_OPTIMAL,
        AccessCategory::WRITE
    ),
    (
        COLOR_ATTACHMENT_WRITE,
        vk::ImageUsageFlags::COLOR_ATTACHMENT,
        vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT,
        vk::AccessFlags::COLOR_ATTACHMENT_WRITE,
        vk::ImageLayout::COLOR_ATTACHMENT_OPTIMAL,
        AccessCategory::WRITE
    ),
    (
        FRAGMENT_SAMPLED,
        vk::ImageUsageFlags::SAMPLED,
        vk::PipelineStageFlags::FRAGMENT_SHADER,
        vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        AccessCategory::READ
    ),
    (
        COMPUTE_SAMPLED,
        vk::ImageUsageFlags::SAMPLED,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        AccessCategory::READ
    ),
    (
        COMPUTE_STORAGE_WRITE,
        vk::ImageUsageFlags::STORAGE,
        vk::PipelineStageFlags::COMPUTE_SHADER,
        vk::AccessFlags::SHADER_WRITE,
        vk::ImageLayout::GENERAL,
        AccessCategory::WRITE
    ),
    (
        RAY_TRACING_STORAGE_READ,
        vk::ImageUsageFlags::STORAGE,
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::GENERAL,
        AccessCategory::READ
    ),
    (
        RAY_TRACING_STORAGE_WRITE,
        vk::ImageUsageFlags::STORAGE,
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::SHADER_WRITE,
        vk::ImageLayout::GENERAL,
        AccessCategory::WRITE
    ),
    (
        RAY_TRACING_SAMPLED,
        vk::ImageUsageFlags::SAMPLED,
        vk::PipelineStageFlags::RAY_TRACING_SHADER_KHR,
        vk::AccessFlags::SHADER_READ,
        vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
        AccessCategory::READ
    ),
}

/// Source and destination masks of a pipeline barrier between two usages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BarrierMasks {
    pub src_stage_mask: vk::PipelineStageFlags,
    pub dst_stage_mask: vk::PipelineStageFlags,
    pub src_access_mask: vk::AccessFlags,
    pub dst_access_mask: vk::AccessFlags,
}

impl BarrierMasks {
    fn new(
        old_stage_mask: vk::PipelineStageFlags,
        new_stage_mask: vk::PipelineStageFlags,
        src_access_mask: vk::AccessFlags,
        dst_access_mask: vk::AccessFlags,
    ) -> Self {
        Self {
            src_stage_mask: if old_stage_mask.is_empty() {
                vk::PipelineStageFlags::BOTTOM_OF_PIPE
            } else {
                old_stage_mask
            },
            dst_stage_mask: if new_stage_mask.is_empty() {
                vk::PipelineStageFlags::TOP_OF_PIPE
            } else {
                new_stage_mask
            },
            src_access_mask,
            dst_access_mask,
        }
    }

    pub fn for_buffer(old_usage: BufferUsage, new_usage: BufferUsage) -> Self {
        Self::new(
            old_usage.as_stage_mask(),
            new_usage.as_stage_mask(),
            old_usage.as_access_mask(),
            new_usage.as_access_mask(),
        )
    }

    pub fn for_image(old_usage: ImageUsage, new_usage: ImageUsage) -> Self {
        Self::new(
            old_usage.as_stage_mask(),
            new_usage.as_stage_mask(),
            old_usage.as_access_mask(),
            new_usage.as_access_mask(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn scratch_is_read_write() {
        let category = BufferUsage::ACCELERATION_STRUCTURE_BUILD_SCRATCH.as_access_category();
        assert!(category.contains(AccessCategory::READ));
        assert!(category.is_write());
        assert!(!BufferUsage::ACCELERATION_STRUCTURE_READ.as_access_category().is_write());
    }

    #[test]
    fn image_layouts_must_agree() {
        assert_eq!(ImageUsage::empty().as_image_layout(), Some(vk::ImageLayout::UNDEFINED));
        assert_eq!(
            (ImageUsage::RAY_TRACING_STORAGE_READ | ImageUsage::RAY_TRACING_STORAGE_WRITE).as_image_layout(),
            Some(vk::ImageLayout::GENERAL)
        );
        assert_eq!(
            (ImageUsage::FRAGMENT_SAMPLED | ImageUsage::COMPUTE_SAMPLED).as_image_layout(),
            Some(vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL)
        );
        assert_eq!((ImageUsage::TRANSFER_READ | ImageUsage::TRANSFER_WRITE).as_image_layout(), None);
    }

    #[test]
    fn barrier_masks_default_to_pipe_ends() {
        let masks = BarrierMasks::for_buffer(BufferUsage::empty(), BufferUsage::HOST_READ);
        assert_eq!(masks.src_stage_mask, vk::PipelineStageFlags::BOTTOM_OF_PIPE);
        assert_eq!(masks.dst_stage_mask, vk::PipelineStageFlags::HOST);
        assert_eq!(masks.dst_access_mask, vk::AccessFlags::HOST_READ);

        let masks = BarrierMasks::for_image(ImageUsage::COLOR_ATTACHMENT_WRITE, ImageUsage::empty());
        assert_eq!(masks.src_stage_mask, vk::PipelineStageFlags::COLOR_ATTACHMENT_OUTPUT);
        assert_eq!(masks.dst_stage_mask, vk::PipelineStageFlags::TOP_OF_PIPE);
    }

    #[test]
    fn combined_usage_lists_each_bit() {
        let usage = ImageUsage::TRANSFER_WRITE | ImageUsage::RAY_TRACING_STORAGE_WRITE;
        let names: Vec<_> = usage.names().collect();
        assert_eq!(names, vec!["TRANSFER_WRITE", "RAY_TRACING_STORAGE_WRITE"]);
        assert_eq!(format!("{:?}", ImageUsage::empty()), "empty");
        assert!(usage.contains(ImageUsage::TRANSFER_WRITE));
        assert!(!usage.contains(ImageUsage::FRAGMENT_SAMPLED));
    }
}
