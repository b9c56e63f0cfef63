use ash::vk;

pub struct Queue {
    pub family: QueueFamily,
    pub handle: vk::Queue,
}

impl Queue {
    pub fn new(family: QueueFamily, handle: vk::Queue) -> Self {
        Self { family, handle }
    }
}

#[derive(Clone, Copy, Debug)]
pub struct QueueFamily {
    pub index: u32,
    pub properties: vk::QueueFamilyProperties,
}

impl QueueFamily {
    pub fn new(index: u32, properties: vk::QueueFamilyProperties) -> Self {
        Self { index, properties }
    }

    pub fn supports_graphics(&self) -> bool {
        self.properties.queue_flags.contains(vk::QueueFlags::GRAPHICS)
    }
}

/// Queue family indices chosen for a physical device. `present` is `None` for headless devices.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct QueueFamilyIndices {
    pub graphics: u32,
    pub present: Option<u32>,
}

impl QueueFamilyIndices {
    /// Picks the first graphics family, and a present family that prefers the graphics one.
    pub fn select(
        families: &[vk::QueueFamilyProperties],
        supports_present: impl Fn(u32) -> bool,
        headless: bool,
    ) -> Option<Self> {
        let graphics = families
            .iter()
            .position(|q| q.queue_flags.contains(vk::QueueFlags::GRAPHICS))? as u32;
        if headless {
            return Some(Self { graphics, present: None });
        }
        let present = if supports_present(graphics) {
            graphics
        } else {
            (0..families.len() as u32).find(|i| supports_present(*i))?
        };
        Some(Self { graphics, present: Some(present) })
    }

    pub fn unique(&self) -> Vec<u32> {
        match self.present {
            Some(present) if present != self.graphics => vec![self.graphics, present],
            _ => vec![self.graphics],
        }
    }

    /// Images shared by two families are created concurrent, otherwise exclusive.
    pub fn image_sharing(&self) -> (vk::SharingMode, Vec<u32>) {
        let unique = self.unique();
        if unique.len() > 1 {
            (vk::SharingMode::CONCURRENT, unique)
        } else {
            (vk::SharingMode::EXCLUSIVE, Vec::new())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn family(flags: vk::QueueFlags) -> vk::QueueFamilyProperties {
        vk::QueueFamilyProperties {
            queue_flags: flags,
            queue_count: 1,
            ..Default::default()
        }
    }

    #[test]
    fn test_shared_family_is_exclusive() {
        let families = [family(vk::QueueFlags::GRAPHICS | vk::QueueFlags::TRANSFER)];
        let indices = QueueFamilyIndices::select(&families, |_| true, false).unwrap();
        assert_eq!(indices, QueueFamilyIndices { graphics: 0, present: Some(0) });
        assert_eq!(indices.image_sharing().0, vk::SharingMode::EXCLUSIVE);
    }

    #[test]
    fn test_split_families_are_concurrent() {
        let families = [
            family(vk::QueueFlags::TRANSFER),
            family(vk::QueueFlags::GRAPHICS),
            family(vk::QueueFlags::COMPUTE),
        ];
        let indices = QueueFamilyIndices::select(&families, |i| i == 2, false).unwrap();
        assert_eq!(indices.graphics, 1);
        assert_eq!(indices.present, Some(2));
        assert_eq!(
            indices.image_sharing(),
            (vk::SharingMode::CONCURRENT, vec![1, 2])
        );
    }

    #[test]
    fn test_missing_families() {
        let families = [family(vk::QueueFlags::COMPUTE)];
        assert!(QueueFamilyIndices::select(&families, |_| true, true).is_none());

        let families = [family(vk::QueueFlags::GRAPHICS)];
        assert!(QueueFamilyIndices::select(&families, |_| false, false).is_none());
        assert_eq!(
            QueueFamilyIndices::select(&families, |_| false, true).unwrap().present,
            None
        );
    }
}
